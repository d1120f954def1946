//! Key-prefix namespacing over a shared store

use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::{Store, StoreResult};

/// Namespace a [`ScopedStore`] writes under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Keys look like `agent-{chat_id}-{assistant_id}-{key}`
    Agent { chat_id: String, assistant_id: String },
    /// Keys look like `chat-{chat_id}-{key}`
    Chat { chat_id: String },
}

impl Scope {
    fn prefix(&self) -> String {
        match self {
            Scope::Agent {
                chat_id,
                assistant_id,
            } => format!("agent-{}-{}", chat_id, assistant_id),
            Scope::Chat { chat_id } => format!("chat-{}", chat_id),
        }
    }
}

/// A store view that prefixes every key with its [`Scope`]
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn Store>,
    scope: Scope,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn Store>, scope: Scope) -> Self {
        Self { inner, scope }
    }

    pub fn agent(
        inner: Arc<dyn Store>,
        chat_id: impl Into<String>,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self::new(
            inner,
            Scope::Agent {
                chat_id: chat_id.into(),
                assistant_id: assistant_id.into(),
            },
        )
    }

    pub fn chat(inner: Arc<dyn Store>, chat_id: impl Into<String>) -> Self {
        Self::new(
            inner,
            Scope::Chat {
                chat_id: chat_id.into(),
            },
        )
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn chat_id(&self) -> &str {
        match &self.scope {
            Scope::Agent { chat_id, .. } | Scope::Chat { chat_id } => chat_id,
        }
    }

    /// Empty for chat scopes
    pub fn assistant_id(&self) -> &str {
        match &self.scope {
            Scope::Agent { assistant_id, .. } => assistant_id,
            Scope::Chat { .. } => "",
        }
    }

    /// The key actually written to the underlying store
    pub fn scoped_key(&self, key: &str) -> String {
        format!("{}-{}", self.scope.prefix(), key)
    }

    /// The shared store under this view
    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }
}

impl Store for ScopedStore {
    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        self.inner.get(&self.scoped_key(key))
    }

    fn set(&self, key: &str, value: JsonValue) -> StoreResult<()> {
        self.inner.set(&self.scoped_key(key), value)
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        self.inner.del(&self.scoped_key(key))
    }
}

impl std::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
