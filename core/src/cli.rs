use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::template::{split_delimiters, Evaluator, Expr};

#[derive(Parser, Debug)]
#[command(name = "rowexpr")]
#[command(about = "Evaluate template expressions against a row set", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a template against a data context
    Eval {
        /// JSON file holding the rows (or a single record); `-` reads stdin
        #[arg(short = 'd', long = "data")]
        data: String,

        /// JSON file holding the template; `-` reads stdin
        #[arg(
            short = 't',
            long = "template",
            conflicts_with = "expr",
            required_unless_present = "expr"
        )]
        template: Option<String>,

        /// A single template string, e.g. "{{ $data[n].price }}"
        #[arg(short = 'e', long = "expr")]
        expr: Option<String>,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Parse one expression and print its structure
    Parse {
        /// Expression, with or without the `{{ }}` delimiters
        expression: String,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder()
        .config_path(cli.config.as_ref().map(PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    init_logging(&config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli.command, &config, &mut out)
}

/// Install the stderr tracing subscriber. `RUST_LOG` wins over `log.level`.
pub fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    // A subscriber may already be installed by an embedding application.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Execute one command, writing its output to `out`
pub fn execute(command: Commands, config: &Config, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Eval {
            data,
            template,
            expr,
            compact,
        } => {
            if data == "-" && template.as_deref() == Some("-") {
                return Err(anyhow!(
                    "--data and --template cannot both read stdin; pass one of them as a file"
                ));
            }

            let data = read_json(&data).context("Failed to read data")?;
            let template = match (template, expr) {
                (_, Some(expr)) => JsonValue::String(expr),
                (Some(path), None) => read_json(&path).context("Failed to read template")?,
                (None, None) => return Err(anyhow!("Either --template or --expr is required")),
            };

            let result = Evaluator::new(data).exec(&template);
            let rendered = if compact || !config.output.pretty {
                serde_json::to_string(&result)?
            } else {
                serde_json::to_string_pretty(&result)?
            };
            writeln!(out, "{}", rendered)?;
        }

        Commands::Parse { expression } => {
            let interior = split_delimiters(&expression).unwrap_or_else(|| expression.trim());
            match Expr::parse(interior) {
                Ok(expr) => {
                    writeln!(out, "{}", serde_json::to_string_pretty(&expr)?)?;
                }
                Err(err) => {
                    let location = err
                        .span()
                        .map(|span| format!(" at line {}, column {}", span.line + 1, span.col + 1))
                        .unwrap_or_default();
                    return Err(anyhow!("Invalid expression{}: {}", location, err));
                }
            }
        }

        Commands::Config => {
            write!(out, "{}", config.to_toml()?)?;
        }
    }

    Ok(())
}

fn read_json(source: &str) -> Result<JsonValue> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Cannot read {}", source))?
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_temp(name: &str, value: &JsonValue) -> String {
        let path = std::env::temp_dir().join(format!("rowexpr-cli-{}-{}.json", name, std::process::id()));
        std::fs::write(&path, value.to_string()).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn run(command: Commands, config: &Config) -> Result<String> {
        let mut out = Vec::new();
        execute(command, config, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_eval_template_file() {
        let data = write_temp("data", &json!([{"qty": 1}, {"qty": 2}]));
        let template = write_temp("template", &json!({"series": ["{{ $data[n].qty }}"]}));

        let output = run(
            Commands::Eval {
                data: data.clone(),
                template: Some(template.clone()),
                expr: None,
                compact: true,
            },
            &Config::default(),
        )
        .unwrap();
        std::fs::remove_file(data).ok();
        std::fs::remove_file(template).ok();

        assert_eq!(output, "{\"series\":[1,2]}\n");
    }

    #[test]
    fn test_eval_inline_expression_pretty() {
        let data = write_temp("inline", &json!([{"name": "a"}]));

        let output = run(
            Commands::Eval {
                data: data.clone(),
                template: None,
                expr: Some("{{ $data[0].name }}".to_string()),
                compact: false,
            },
            &Config::default(),
        )
        .unwrap();
        std::fs::remove_file(data).ok();

        assert_eq!(output, "\"a\"\n");
    }

    #[test]
    fn test_eval_respects_output_config() {
        let data = write_temp("config", &json!([{"x": 1}]));
        let mut config = Config::default();
        config.output.pretty = false;

        let output = run(
            Commands::Eval {
                data: data.clone(),
                template: None,
                expr: Some("{{ v:$data[n].x }}".to_string()),
                compact: false,
            },
            &config,
        )
        .unwrap();
        std::fs::remove_file(data).ok();

        assert_eq!(output, "[{\"v\":1}]\n");
    }

    #[test]
    fn test_eval_missing_data_file() {
        let err = run(
            Commands::Eval {
                data: "/nonexistent/data.json".to_string(),
                template: None,
                expr: Some("{{ $data[n].x }}".to_string()),
                compact: true,
            },
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read data"));
    }

    #[test]
    fn test_eval_rejects_stdin_for_both_inputs() {
        let err = run(
            Commands::Eval {
                data: "-".to_string(),
                template: Some("-".to_string()),
                expr: None,
                compact: true,
            },
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot both read stdin"), "got: {}", err);
    }

    #[test]
    fn test_parse_prints_structure() {
        let output = run(
            Commands::Parse {
                expression: "{{ $data[n].size.width }}".to_string(),
            },
            &Config::default(),
        )
        .unwrap();
        let parsed: JsonValue = serde_json::from_str(&output).unwrap();
        assert_eq!(
            parsed,
            json!({"t": "access", "rows": {"t": "all"}, "path": ["size", "width"]})
        );
    }

    #[test]
    fn test_parse_reports_location() {
        let err = run(
            Commands::Parse {
                expression: "$data.width".to_string(),
            },
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 1, column 6"), "got: {}", err);
    }

    #[test]
    fn test_config_command_prints_toml() {
        let output = run(Commands::Config, &Config::default()).unwrap();
        assert!(output.contains("[retry]"));
        assert!(output.contains("times = 3"));
    }

    #[test]
    fn test_template_and_expr_conflict() {
        let result = Cli::try_parse_from([
            "rowexpr", "eval", "-d", "d.json", "-t", "t.json", "-e", "{{ $data[0].x }}",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["rowexpr", "eval", "-d", "d.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["rowexpr", "config", "--config", "custom.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("custom.toml"));
        assert!(matches!(cli.command, Commands::Config));
    }
}
