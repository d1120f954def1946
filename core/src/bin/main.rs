/// rowexpr CLI
///
/// Evaluates chart and report templates against JSON row sets from the
/// command line. Logs go to stderr; stdout carries only the JSON result.

use rowexpr_core::cli;

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
