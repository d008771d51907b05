//! Completion backends.
//!
//! Currently a local Ollama instance, used through `OllamaCompletion`.

mod ollama;

pub use ollama::{
    ChatMessage, ChatResponse, OllamaClient, OllamaCompletion, OllamaError, DEFAULT_MODEL,
};
