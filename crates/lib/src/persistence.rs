//! Durable copy of the chat log under one fixed storage key.
//!
//! Best effort in both directions: a failed or corrupt read yields an empty
//! history, and failed writes are logged, never returned to the session.

use crate::message::{Message, Role};
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};

/// Storage key used when the config does not name one.
pub const DEFAULT_STORAGE_KEY: &str = "chat-messages";

/// Current on-disk envelope version.
pub const HISTORY_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    version: u32,
    messages: &'a [Message],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Envelope {
        version: u32,
        messages: Vec<serde_json::Value>,
    },
    /// Unversioned array written by earlier widget builds.
    Legacy(Vec<serde_json::Value>),
}

/// Load/save/erase of the message log through a `KeyValueStore`.
pub struct HistoryStore<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> HistoryStore<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Read the persisted log. Never fails; malformed entries are dropped.
    pub fn load(&self) -> Vec<Message> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("history: reading {} failed, starting empty: {}", self.key, e);
                return Vec::new();
            }
        };
        decode_history(&raw, &self.key)
    }

    /// Write the full log. Failures are logged and swallowed.
    pub fn save(&self, messages: &[Message]) {
        let envelope = EnvelopeOut {
            version: HISTORY_VERSION,
            messages,
        };
        let json = match serde_json::to_string(&envelope) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("history: serializing {} failed: {}", self.key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &json) {
            log::warn!("history: saving {} failed: {}", self.key, e);
        }
    }

    /// Remove the persisted record entirely.
    pub fn erase(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            log::warn!("history: erasing {} failed: {}", self.key, e);
        }
    }
}

fn decode_history(raw: &str, key: &str) -> Vec<Message> {
    let entries = match serde_json::from_str::<Stored>(raw) {
        Ok(Stored::Envelope { version, messages }) if version == HISTORY_VERSION => messages,
        Ok(Stored::Envelope { version, .. }) => {
            log::warn!(
                "history: {} has unsupported version {}, starting empty",
                key,
                version
            );
            return Vec::new();
        }
        Ok(Stored::Legacy(messages)) => messages,
        Err(e) => {
            log::warn!("history: {} is not valid history json, starting empty: {}", key, e);
            return Vec::new();
        }
    };

    let total = entries.len();
    let messages: Vec<Message> = entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Message>(v).ok())
        .filter(|m| m.role != Role::User || !m.content.trim().is_empty())
        .collect();
    if messages.len() < total {
        log::debug!(
            "history: dropped {} malformed entr(ies) from {}",
            total - messages.len(),
            key
        );
    }
    messages
}
