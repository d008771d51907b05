//! Ollama API client (http://127.0.0.1:11434 by default).
//! Non-streaming chat only; the widget shows whole replies.

use crate::completion::{CompletionClient, CompletionError, CompletionMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:latest";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {status} {message}")]
    Api { status: u16, message: String },
}

impl OllamaClient {
    /// `timeout` bounds the whole request; None leaves it to the OS.
    pub fn new(base_url: Option<String>, timeout: Option<Duration>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().unwrap_or_else(|e| {
            log::warn!("ollama: client builder failed ({}), using defaults", e);
            reqwest::Client::new()
        });
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /api/chat — non-streaming chat completion.
    pub async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatResponse, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api {
                status,
                message: api_error_message(&body),
            });
        }
        let data: ChatResponse = res.json().await?;
        Ok(data)
    }
}

/// Ollama returns `{"error": "..."}` on failure; fall back to the raw body.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
}

impl ChatResponse {
    /// Text content of the assistant message, if any.
    pub fn content(&self) -> &str {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// `CompletionClient` over Ollama chat with an optional system prompt prepended.
#[derive(Clone)]
pub struct OllamaCompletion {
    client: OllamaClient,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaCompletion {
    pub fn new(client: OllamaClient, model: impl Into<String>, system_prompt: Option<String>) -> Self {
        let model = model.into();
        let model = if model.trim().is_empty() {
            log::warn!("ollama: configured model was empty, using fallback");
            DEFAULT_MODEL.to_string()
        } else {
            model.trim().to_string()
        };
        Self {
            client,
            model,
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(&self, messages: &[CompletionMessage]) -> Vec<ChatMessage> {
        let system = self.system_prompt.as_ref().map(|p| ChatMessage {
            role: "system".to_string(),
            content: p.clone(),
        });
        system
            .into_iter()
            .chain(messages.iter().map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            }))
            .collect()
    }
}

impl From<OllamaError> for CompletionError {
    fn from(e: OllamaError) -> Self {
        match e {
            OllamaError::Api { message, .. } if !message.is_empty() => {
                CompletionError::Service(message)
            }
            other => CompletionError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl CompletionClient for OllamaCompletion {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, CompletionError> {
        log::debug!("ollama: chat with model {} ({} messages)", self.model, messages.len());
        let res = self
            .client
            .chat(&self.model, self.build_messages(messages))
            .await?;
        Ok(res.content().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn base_url_is_normalized() {
        let c = OllamaClient::new(Some("http://host:11434/".into()), None);
        assert_eq!(c.base_url(), "http://host:11434");
        let c = OllamaClient::new(Some("".into()), None);
        assert_eq!(c.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn system_prompt_is_prepended() {
        let c = OllamaCompletion::new(
            OllamaClient::new(None, None),
            "qwen3:8b",
            Some("You are an investing tutor.".into()),
        );
        let msgs = c.build_messages(&[CompletionMessage {
            role: Role::User,
            content: "Apa itu IHSG?".into(),
        }]);
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user"]);
    }

    #[test]
    fn blank_model_and_prompt_fall_back() {
        let c = OllamaCompletion::new(OllamaClient::new(None, None), "  ", Some(" ".into()));
        assert_eq!(c.model(), DEFAULT_MODEL);
        assert!(c.build_messages(&[]).is_empty());
    }

    #[test]
    fn api_error_body_is_unwrapped() {
        assert_eq!(api_error_message(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(api_error_message(" bad gateway "), "bad gateway");
        let e: CompletionError = OllamaError::Api {
            status: 404,
            message: "model not found".into(),
        }
        .into();
        assert_eq!(e, CompletionError::Service("model not found".into()));
    }
}
