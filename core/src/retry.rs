//! Retry counter for assistant turns
//!
//! Counts consecutive failures of one operation in a [`ScopedStore`]. While
//! attempts remain, a failure produces a [`NextAction`] that re-asks the
//! assistant with a repair prompt; once they run out the counter is cleared
//! and the caller is told to abort.

use pest::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use tracing::debug;

use crate::config::RetryConfig;
use crate::store::{ScopedStore, Store, StoreError};
use crate::template::parser::{ExprParser, Rule, EXPR_START};

pub const DEFAULT_REPAIR_PROMPT: &str = "The last answer is wrong, please try again.

Error:
{{ error }}

User Question:
{{ lastInput }}";

/// Instruction handed back to the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub action: String,
    pub payload: NextPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPayload {
    pub assistant_id: String,
    pub chat_id: String,
    pub input: JsonValue,
    pub retry: bool,
}

/// Result of [`Retry::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The operation succeeded; the counter was cleared
    Done(T),
    /// The operation failed with attempts left
    Retry { message: String, next: NextAction },
    /// The operation failed and no attempts are left; the counter was cleared
    Abort { message: String },
}

#[derive(Debug, Clone)]
pub struct Retry {
    times: u32,
    key: String,
    store: ScopedStore,
    input: Vec<JsonValue>,
    repair_prompt: Option<String>,
}

impl Retry {
    /// `label` identifies the operation; it is hashed into the counter key.
    /// `input` is the conversation so far, last message last.
    pub fn new(store: ScopedStore, times: u32, label: &str, input: Vec<JsonValue>) -> Self {
        Self {
            times,
            key: counter_key(label),
            store,
            input,
            repair_prompt: None,
        }
    }

    /// Like [`new`](Self::new), with the attempt count from configuration
    pub fn from_config(
        store: ScopedStore,
        config: &RetryConfig,
        label: &str,
        input: Vec<JsonValue>,
    ) -> Self {
        Self::new(store, config.times, label, input)
    }

    pub fn with_repair_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.repair_prompt = Some(prompt.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Failures recorded so far (1 when nothing is stored)
    pub fn failed_count(&self) -> Result<u64, StoreError> {
        let stored = self.store.get(&self.key)?;
        Ok(stored
            .as_ref()
            .and_then(JsonValue::as_u64)
            .filter(|count| *count > 0)
            .unwrap_or(1))
    }

    pub fn run<T, E: Display>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<Outcome<T>, StoreError> {
        let error = match f() {
            Ok(value) => {
                self.store.del(&self.key)?;
                return Ok(Outcome::Done(value));
            }
            Err(error) => error,
        };

        let mut message = error.to_string();
        if message.is_empty() {
            message = "Unknown error".to_string();
        }

        let failed = self.failed_count()?;
        if failed >= u64::from(self.times) {
            debug!(key = %self.key, failed, "Retry attempts exhausted");
            self.store.del(&self.key)?;
            return Ok(Outcome::Abort { message });
        }

        debug!(key = %self.key, failed, "Scheduling retry");
        let next = self.next_action(&message, None);
        self.store.set(&self.key, json!(failed + 1))?;
        Ok(Outcome::Retry { message, next })
    }

    /// Build the action that re-asks the assistant
    pub fn next_action(&self, error: &str, extra: Option<&Map<String, JsonValue>>) -> NextAction {
        let prompt = self.render_repair_prompt(error, extra);
        let input = match self.input.last() {
            Some(JsonValue::Object(last)) => {
                let mut last = last.clone();
                last.insert("text".to_string(), JsonValue::String(prompt));
                JsonValue::Object(last)
            }
            _ => json!({ "text": prompt }),
        };

        NextAction {
            action: "assistant".to_string(),
            payload: NextPayload {
                assistant_id: self.store.assistant_id().to_string(),
                chat_id: self.store.chat_id().to_string(),
                input,
                retry: true,
            },
        }
    }

    /// Render the repair prompt with `error`, `lastInput` and any `extra` values
    pub fn render_repair_prompt(&self, error: &str, extra: Option<&Map<String, JsonValue>>) -> String {
        let last_text = self
            .input
            .last()
            .and_then(|last| last.get("text"))
            .cloned()
            .unwrap_or_else(|| JsonValue::String(String::new()));

        let mut vars = Map::new();
        vars.insert("error".to_string(), JsonValue::String(error.to_string()));
        vars.insert("lastInput".to_string(), last_text);
        if let Some(extra) = extra {
            vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let template = match self.repair_prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => DEFAULT_REPAIR_PROMPT,
        };
        render_prompt(template, &vars)
    }
}

fn counter_key(label: &str) -> String {
    format!("RETRY_{:x}", Sha256::digest(label.as_bytes()))
}

/// Replace `{{ name }}` placeholders with values from `vars`.
///
/// Unknown names are left as written. String values are inserted raw, other
/// values as JSON.
pub fn render_prompt(template: &str, vars: &Map<String, JsonValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(EXPR_START) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match placeholder(candidate) {
            Some((name, len)) => {
                match vars.get(name) {
                    Some(JsonValue::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => out.push_str(&candidate[..len]),
                }
                rest = &candidate[len..];
            }
            None => {
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Match a placeholder at the start of `source`, returning its name and length
fn placeholder(source: &str) -> Option<(&str, usize)> {
    let pair = ExprParser::parse(Rule::placeholder, source).ok()?.next()?;
    let len = pair.as_span().end();
    let name = pair.into_inner().next()?.as_str();
    Some((name, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn retry(times: u32) -> (Arc<MemoryStore>, Retry) {
        let shared = Arc::new(MemoryStore::new());
        let store = ScopedStore::agent(shared.clone(), "chat-1", "asst-1");
        let input = vec![
            json!({"role": "user", "text": "first"}),
            json!({"role": "user", "text": "show sales by style", "attachments": []}),
        ];
        (shared, Retry::new(store, times, "build chart", input))
    }

    #[test]
    fn test_counter_key_is_stable_hash() {
        let (_, a) = retry(3);
        let (_, b) = retry(3);
        assert_eq!(a.key(), b.key());
        assert!(a.key().starts_with("RETRY_"));
        assert_eq!(a.key().len(), "RETRY_".len() + 64);
        assert_ne!(counter_key("build chart"), counter_key("build table"));
    }

    #[test]
    fn test_success_clears_counter() {
        let (shared, retry) = retry(3);
        shared
            .set(&format!("agent-chat-1-asst-1-{}", retry.key()), json!(2))
            .unwrap();

        let outcome = retry.run(|| Ok::<_, String>(7)).unwrap();

        assert_eq!(outcome, Outcome::Done(7));
        assert!(shared.is_empty().unwrap());
    }

    #[test]
    fn test_failures_retry_then_abort() {
        let (shared, retry) = retry(3);
        let fail = || Err::<(), _>("chart has no series");

        let first = retry.run(fail).unwrap();
        assert!(matches!(first, Outcome::Retry { .. }));
        assert_eq!(retry.failed_count().unwrap(), 2);

        let second = retry.run(fail).unwrap();
        assert!(matches!(second, Outcome::Retry { .. }));
        assert_eq!(retry.failed_count().unwrap(), 3);

        let third = retry.run(fail).unwrap();
        assert_eq!(
            third,
            Outcome::Abort {
                message: "chart has no series".to_string()
            }
        );
        assert!(shared.is_empty().unwrap());
    }

    #[test]
    fn test_from_config_uses_configured_times() {
        let store = ScopedStore::chat(Arc::new(MemoryStore::new()), "c");
        let retry = Retry::from_config(store, &RetryConfig { times: 2 }, "op", Vec::new());

        assert!(matches!(retry.run(|| Err::<(), _>("x")).unwrap(), Outcome::Retry { .. }));
        assert!(matches!(retry.run(|| Err::<(), _>("x")).unwrap(), Outcome::Abort { .. }));
    }

    #[test]
    fn test_single_attempt_aborts_immediately() {
        let (_, retry) = retry(1);
        let outcome = retry.run(|| Err::<(), _>("boom")).unwrap();
        assert!(matches!(outcome, Outcome::Abort { .. }));
    }

    #[test]
    fn test_next_action_carries_repair_prompt() {
        let (_, retry) = retry(3);
        let Outcome::Retry { message, next } = retry.run(|| Err::<(), _>("bad json")).unwrap() else {
            panic!("Expected retry");
        };

        assert_eq!(message, "bad json");
        assert_eq!(next.action, "assistant");
        assert_eq!(next.payload.assistant_id, "asst-1");
        assert_eq!(next.payload.chat_id, "chat-1");
        assert!(next.payload.retry);
        assert_eq!(next.payload.input["role"], json!("user"));
        assert_eq!(next.payload.input["attachments"], json!([]));
        assert_eq!(
            next.payload.input["text"],
            json!("The last answer is wrong, please try again.\n\nError:\nbad json\n\nUser Question:\nshow sales by style")
        );
    }

    #[test]
    fn test_custom_repair_prompt_with_extra_values() {
        let (_, retry) = retry(3);
        let retry = retry.with_repair_prompt("Fix {{error}} for {{ table }} ({{ unknown }})");
        let mut extra = Map::new();
        extra.insert("table".to_string(), json!("orders"));

        let prompt = retry.render_repair_prompt("missing column", Some(&extra));

        assert_eq!(prompt, "Fix missing column for orders ({{ unknown }})");
    }

    #[test]
    fn test_render_prompt_edge_cases() {
        let mut vars = Map::new();
        vars.insert("n".to_string(), json!(3));
        vars.insert("s".to_string(), json!("x"));

        assert_eq!(render_prompt("no placeholders", &vars), "no placeholders");
        assert_eq!(render_prompt("{{ n }} items", &vars), "3 items");
        assert_eq!(render_prompt("{{{ s }}}", &vars), "{x}");
        assert_eq!(render_prompt("{{ s", &vars), "{{ s");
        assert_eq!(render_prompt("{{ a b }}", &vars), "{{ a b }}");
        assert_eq!(render_prompt("{{s}}{{s}}", &vars), "xx");
    }
}
