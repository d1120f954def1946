pub mod cli;
pub mod config;
pub mod gateway;
pub mod lock;
pub mod retry;
pub mod store;
pub mod template;

// Re-export main types
pub use crate::config::Config;
pub use template::{Evaluator, Expr};
