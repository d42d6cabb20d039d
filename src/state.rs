//! Session-wide shared state: the processing gate, live settings, and
//! conversation history.
//!
//! Owned by the pipeline supervisor and passed by `Arc` to each stage;
//! no ambient globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::defaults;
use crate::pipeline::history::ConversationHistory;

/// Free-form client settings with typed accessors for the known keys.
///
/// Clients push arbitrary key/value pairs; merging overwrites provided keys
/// and leaves the rest untouched. No schema validation beyond JSON shape.
#[derive(Debug, Clone)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert(
            "conversationContext".to_string(),
            Value::String("Casual conversation with a friend.".to_string()),
        );
        values.insert(
            "personalInfo".to_string(),
            Value::String("My name is User. I speak English.".to_string()),
        );
        values.insert(
            "responseLanguage".to_string(),
            Value::String("detected".to_string()),
        );
        values.insert("userName".to_string(), Value::String("User".to_string()));
        Self { values }
    }
}

impl Settings {
    /// Overwrite the provided keys, keeping everything else.
    pub fn merge(&mut self, incoming: &Map<String, Value>) {
        for (key, value) in incoming {
            self.values.insert(key.clone(), value.clone());
        }
    }

    fn string_value(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn conversation_context(&self) -> String {
        self.string_value("conversationContext")
            .unwrap_or_else(|| "Casual conversation with a friend.".to_string())
    }

    pub fn personal_info(&self) -> String {
        self.string_value("personalInfo").unwrap_or_default()
    }

    pub fn response_language(&self) -> String {
        self.string_value("responseLanguage")
            .unwrap_or_else(|| "detected".to_string())
    }

    pub fn user_name(&self) -> String {
        self.string_value("userName")
            .unwrap_or_else(|| "User".to_string())
    }
}

/// State shared between the control plane and the pipeline stages.
#[derive(Debug)]
pub struct SharedState {
    enabled: AtomicBool,
    pub settings: RwLock<Settings>,
    pub history: Mutex<ConversationHistory>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            settings: RwLock::new(Settings::default()),
            history: Mutex::new(ConversationHistory::new(defaults::MAX_HISTORY_TURNS)),
        })
    }

    /// Whether processing is currently enabled. Read by every stage before
    /// doing work.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}
