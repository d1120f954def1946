//! Remote-call gateway
//!
//! The host runtime exposes named processes (`models.user.Find`,
//! `crypto.Hash`, ...) that take positional JSON arguments. [`Gateway`] is the
//! seam for that call; [`StaticGateway`] stands in for the host in tests.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The process ran and failed with a status code
    #[error("{message} ({code})")]
    Process { code: u16, message: String },

    #[error("Process not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn process(code: u16, message: impl Into<String>) -> Self {
        GatewayError::Process {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            GatewayError::Process { code, .. } => *code,
            GatewayError::NotFound(_) => 404,
        }
    }
}

pub type GatewayResult = Result<JsonValue, GatewayError>;

pub trait Gateway: Send + Sync {
    fn call(&self, name: &str, args: &[JsonValue]) -> GatewayResult;
}

type Handler = Arc<dyn Fn(&[JsonValue]) -> GatewayResult + Send + Sync>;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<JsonValue>,
}

/// Gateway backed by registered closures; records every call
#[derive(Default, Clone)]
pub struct StaticGateway {
    handlers: HashMap<String, Handler>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`
    pub fn handle<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[JsonValue]) -> GatewayResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a process that always returns `value`
    pub fn returning(self, name: impl Into<String>, value: JsonValue) -> Self {
        self.handle(name, move |_| Ok(value.clone()))
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Gateway for StaticGateway {
    fn call(&self, name: &str, args: &[JsonValue]) -> GatewayResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                name: name.to_string(),
                args: args.to_vec(),
            });
        }

        let handler = self.handlers.get(name).ok_or_else(|| {
            debug!(process = name, "No handler registered");
            GatewayError::NotFound(name.to_string())
        })?;
        handler(args)
    }
}

impl std::fmt::Debug for StaticGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("StaticGateway")
            .field("handlers", &names)
            .finish_non_exhaustive()
    }
}
