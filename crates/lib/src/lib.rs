//! Tanya core library — the chat assistant's session engine: message log,
//! request lifecycle, local history persistence, and the completion backend.

pub mod completion;
pub mod config;
pub mod controller;
pub mod init;
pub mod llm;
pub mod message;
pub mod persistence;
pub mod session;
pub mod storage;

pub use completion::{CompletionClient, CompletionError, CompletionMessage};
pub use controller::{BusyPolicy, ChatSession, PendingReply, ReplyOutcome, SessionOptions};
pub use message::{Message, Role};
pub use persistence::HistoryStore;
pub use session::{SessionState, SessionView};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
