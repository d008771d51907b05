//! Session state for one chat widget: ordered message log plus transient UI flags.
//!
//! Only the message log is durable; `is_loading`, `is_open` and `error` live for
//! the widget's lifetime. Mutations that touch the log report it so the owner
//! can persist.

use crate::message::{Message, MessageId};
use serde::Serialize;

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_open: bool,
    pub error: Option<String>,
}

/// The mutable aggregate. Exactly one per widget lifetime.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    messages: Vec<Message>,
    is_loading: bool,
    is_open: bool,
    error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State rehydrated from a persisted log.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            messages: self.messages.clone(),
            is_loading: self.is_loading,
            is_open: self.is_open,
            error: self.error.clone(),
        }
    }

    /// Append a user message and enter loading. No-op (returns None) when the
    /// trimmed text is empty or a send is already in progress.
    pub fn append_user_message(&mut self, text: &str) -> Option<MessageId> {
        if text.trim().is_empty() || self.is_loading {
            return None;
        }
        let message = Message::user(text);
        let id = message.id.clone();
        self.messages.push(message);
        self.is_loading = true;
        self.error = None;
        Some(id)
    }

    /// Append the assistant reply and leave loading.
    pub fn append_assistant_message(&mut self, text: impl Into<String>) -> MessageId {
        let message = Message::assistant(text);
        let id = message.id.clone();
        self.messages.push(message);
        self.is_loading = false;
        id
    }

    /// Undo the speculative user message of a failed send and record the error.
    pub fn rollback_last_message(&mut self, error_text: impl Into<String>) -> Option<Message> {
        let removed = self.messages.pop();
        self.is_loading = false;
        self.error = Some(error_text.into());
        removed
    }

    /// Silently drop the pending user message `id` (superseded or cancelled send).
    /// Leaves `error` alone. Returns true if the log changed.
    pub fn withdraw_pending(&mut self, id: &str) -> bool {
        self.is_loading = false;
        match self.messages.last() {
            Some(last) if last.id == id => {
                self.messages.pop();
                true
            }
            _ => false,
        }
    }

    /// Empty the log and drop any error. Visibility is untouched.
    /// Returns true if there were messages to remove.
    pub fn clear(&mut self) -> bool {
        let changed = !self.messages.is_empty();
        self.messages.clear();
        self.is_loading = false;
        self.error = None;
        changed
    }

    pub fn toggle_open(&mut self) {
        self.is_open = !self.is_open;
        self.error = None;
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
