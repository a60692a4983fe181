//! Typed per-conversation context with a bounded extension map.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matchers::Stage;

pub const MAX_CONTEXT_ENTRIES: usize = 32;
pub const MAX_CONTEXT_VALUE_BYTES: usize = 1024;
/// Undecided user texts kept for re-scoring.
pub const MAX_PENDING_TEXTS: usize = 5;

static CONTEXT_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_.-]{0,63}$").expect("context key regex should compile")
});

#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("Context map is full ({} entries)", MAX_CONTEXT_ENTRIES)]
    TooManyEntries,

    #[error("Invalid context key '{0}'")]
    InvalidKey(String),

    #[error("Context value for '{key}' is {bytes} bytes (max {})", MAX_CONTEXT_VALUE_BYTES)]
    ValueTooLarge { key: String, bytes: usize },
}

/// Free-form metadata, validated on every insert and on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, serde_json::Value>")]
#[serde(into = "BTreeMap<String, serde_json::Value>")]
pub struct ContextMap {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: serde_json::Value) -> Result<(), ContextError> {
        if !CONTEXT_KEY_RE.is_match(key) {
            return Err(ContextError::InvalidKey(key.to_string()));
        }
        let bytes = value.to_string().len();
        if bytes > MAX_CONTEXT_VALUE_BYTES {
            return Err(ContextError::ValueTooLarge {
                key: key.to_string(),
                bytes,
            });
        }
        if !self.entries.contains_key(key) && self.entries.len() >= MAX_CONTEXT_ENTRIES {
            return Err(ContextError::TooManyEntries);
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.entries.iter()
    }
}

impl TryFrom<BTreeMap<String, serde_json::Value>> for ContextMap {
    type Error = ContextError;

    fn try_from(raw: BTreeMap<String, serde_json::Value>) -> Result<Self, Self::Error> {
        let mut map = ContextMap::new();
        for (k, v) in raw {
            map.insert(&k, v)?;
        }
        Ok(map)
    }
}

impl From<ContextMap> for BTreeMap<String, serde_json::Value> {
    fn from(map: ContextMap) -> Self {
        map.entries
    }
}

/// Structured context the funnel relies on, plus [`ContextMap`] for
/// anything else callers want to carry along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Recent user texts that did not lead to a decision, oldest first.
    #[serde(default)]
    pub pending_problem: Vec<String>,
    /// Deepest funnel stage reached on the last turn.
    #[serde(default)]
    pub last_stage: Option<Stage>,
    #[serde(default)]
    pub ext: ContextMap,
}

impl ConversationContext {
    pub fn push_problem(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.pending_problem.push(text.to_string());
        if self.pending_problem.len() > MAX_PENDING_TEXTS {
            let excess = self.pending_problem.len() - MAX_PENDING_TEXTS;
            self.pending_problem.drain(..excess);
        }
    }

    /// Accumulated problem description.
    pub fn problem_text(&self) -> String {
        self.pending_problem.join(" ")
    }

    pub fn clear_problem(&mut self) {
        self.pending_problem.clear();
    }
}
