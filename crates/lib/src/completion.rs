//! Message-completion collaborator: the full ordered conversation in, one reply out.

use crate::message::{Message, Role};
use async_trait::async_trait;
use serde::Serialize;

/// Text shown when the service gives no usable error message.
pub const DEFAULT_FALLBACK_ERROR: &str =
    "Sorry, the assistant is unavailable right now. Please try again.";

/// What the completion service sees of a message: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for CompletionMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// The request was abandoned (superseded send, cleared chat, or teardown).
    #[error("completion cancelled")]
    Cancelled,
    /// The service answered with an error it wants shown.
    #[error("{0}")]
    Service(String),
    /// The request never produced a usable response.
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion returned an empty reply")]
    EmptyReply,
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }

    /// Text for the session's `error` field.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            CompletionError::Service(msg) if !msg.trim().is_empty() => msg.trim().to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Async completion service. Implementations need not handle cancellation
/// themselves; the session drops the pending future when a request is abandoned.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError>;
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for std::sync::Arc<T> {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        (**self).complete(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_message_is_surfaced() {
        let e = CompletionError::Service("network error".into());
        assert_eq!(e.user_message("fallback"), "network error");
    }

    #[test]
    fn other_failures_use_fallback() {
        assert_eq!(CompletionError::Service("  ".into()).user_message("fb"), "fb");
        assert_eq!(CompletionError::Transport("dns".into()).user_message("fb"), "fb");
        assert_eq!(CompletionError::EmptyReply.user_message("fb"), "fb");
    }

    #[test]
    fn strips_id_and_timestamp() {
        let m = Message::user("halo");
        let c = CompletionMessage::from(&m);
        assert_eq!(c.role, Role::User);
        assert_eq!(c.content, "halo");
        let v = serde_json::to_value(&c).unwrap();
        assert!(v.get("timestamp").is_none());
        assert!(v.get("id").is_none());
    }
}
