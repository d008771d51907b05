//! Chat messages exchanged between the widget user and the assistant.
//!
//! Messages are immutable once created. The timestamp round-trips through
//! persistence as an RFC 3339 string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque message identifier, unique within one session.
pub type MessageId = String;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// User message; content is trimmed. Callers reject empty input before this point.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self::new(Role::User, content.as_ref().trim().to_string())
    }

    /// Assistant message; content is kept exactly as the service returned it.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    fn new(role: Role, content: String) -> Self {
        let timestamp = Utc::now();
        Self {
            id: new_message_id(&timestamp),
            content,
            role,
            timestamp,
        }
    }
}

/// Millisecond timestamp plus a short random suffix, e.g. `1718000000000-3f2a9c1d`.
fn new_message_id(at: &DateTime<Utc>) -> MessageId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.timestamp_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_content_is_trimmed() {
        let m = Message::user("  Apa itu IHSG?\n");
        assert_eq!(m.content, "Apa itu IHSG?");
        assert_eq!(m.role, Role::User);
    }

    #[test]
    fn assistant_content_is_verbatim() {
        let m = Message::assistant(" IHSG adalah indeks... ");
        assert_eq!(m.content, " IHSG adalah indeks... ");
        assert_eq!(m.role, Role::Assistant);
    }

    #[test]
    fn ids_are_distinct_within_same_millisecond() {
        let a = Message::user("a");
        let b = Message::user("b");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with(&a.timestamp.timestamp_millis().to_string()));
    }

    #[test]
    fn serializes_role_lowercase_and_timestamp_as_string() {
        let m = Message::assistant("ok");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v.get("role").and_then(|r| r.as_str()), Some("assistant"));
        assert!(v.get("timestamp").map(|t| t.is_string()).unwrap_or(false));
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, m);
    }
}
