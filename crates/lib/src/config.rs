//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tanya/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::completion::DEFAULT_FALLBACK_ERROR;
use crate::controller::{BusyPolicy, SessionOptions};
use crate::persistence::DEFAULT_STORAGE_KEY;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Chat widget behavior and history storage.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Completion backend (Ollama).
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Chat session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Key the conversation is stored under (default "chat-messages").
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Directory for persisted history. Relative paths are resolved against the config file's parent. Default: `storage` next to the config file.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// "reject" (default) ignores sends while a reply is pending; "supersede" cancels the pending one.
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Error text shown when the service gives none.
    #[serde(default = "default_fallback_error")]
    pub fallback_error: String,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_fallback_error() -> String {
    DEFAULT_FALLBACK_ERROR.to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            storage_dir: None,
            busy_policy: BusyPolicy::default(),
            fallback_error: default_fallback_error(),
        }
    }
}

impl ChatConfig {
    pub fn session_options(&self) -> SessionOptions {
        let fallback = self.fallback_error.trim();
        SessionOptions {
            busy_policy: self.busy_policy,
            fallback_error: if fallback.is_empty() {
                default_fallback_error()
            } else {
                fallback.to_string()
            },
        }
    }
}

/// Completion backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Ollama base URL (default http://127.0.0.1:11434). Overridden by OLLAMA_BASE_URL env.
    pub base_url: Option<String>,
    /// Model name as shown by `ollama list`. Overridden by TANYA_MODEL env.
    pub model: Option<String>,
    /// System prompt prepended to every completion (assistant persona).
    pub system_prompt: Option<String>,
    /// Per-request timeout in seconds; unset means no client-side timeout.
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the model: env TANYA_MODEL overrides config.
pub fn resolve_model(config: &Config) -> Option<String> {
    non_empty_env("TANYA_MODEL").or_else(|| {
        config
            .llm
            .model
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the Ollama base URL: env OLLAMA_BASE_URL overrides config.
pub fn resolve_base_url(config: &Config) -> Option<String> {
    non_empty_env("OLLAMA_BASE_URL").or_else(|| {
        config
            .llm
            .base_url
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TANYA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".tanya").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the history storage directory: `chat.storageDir` if set (relative to the config file's parent), otherwise `storage` next to the config file.
pub fn resolve_storage_dir(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.chat.storage_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                parent.join(d)
            }
        }
        _ => parent.join("storage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.chat.storage_key, "chat-messages");
        assert_eq!(config.chat.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.chat.fallback_error, DEFAULT_FALLBACK_ERROR);
        assert!(config.llm.model.is_none());
        assert!(config.llm.timeout().is_none());
    }

    #[test]
    fn parses_camel_case_fields() {
        let config: Config = serde_json::from_str(
            r#"{
                "chat": {"storageKey": "asisten", "busyPolicy": "supersede", "fallbackError": "Coba lagi."},
                "llm": {"baseUrl": "http://gpu:11434", "model": "qwen3:8b", "timeoutSecs": 30}
            }"#,
        )
        .unwrap();
        assert_eq!(config.chat.storage_key, "asisten");
        assert_eq!(config.chat.busy_policy, BusyPolicy::Supersede);
        assert_eq!(config.llm.timeout(), Some(Duration::from_secs(30)));
        let opts = config.chat.session_options();
        assert_eq!(opts.fallback_error, "Coba lagi.");
        assert_eq!(opts.busy_policy, BusyPolicy::Supersede);
    }

    #[test]
    fn blank_fallback_uses_default() {
        let mut chat = ChatConfig::default();
        chat.fallback_error = "  ".into();
        assert_eq!(chat.session_options().fallback_error, DEFAULT_FALLBACK_ERROR);
    }

    #[test]
    fn resolve_storage_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.tanya/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.tanya/storage")
        );
    }

    #[test]
    fn resolve_storage_dir_override_relative() {
        let mut config = Config::default();
        config.chat.storage_dir = Some(PathBuf::from("data/chat"));
        let path = Path::new("/home/user/.tanya/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.tanya/data/chat")
        );
    }

    #[test]
    fn resolve_storage_dir_override_absolute() {
        let mut config = Config::default();
        config.chat.storage_dir = Some(PathBuf::from("/var/lib/tanya"));
        let path = Path::new("/home/user/.tanya/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/var/lib/tanya")
        );
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir()
            .join(format!("tanya-config-test-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.chat.storage_key, DEFAULT_STORAGE_KEY);
    }
}
