//! Initialize the configuration directory (~/.tanya): default config and history storage.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::persistence::HistoryStore;
use crate::storage::FileStore;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the history storage directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let storage = config::resolve_storage_dir(&config, config_path);
    if !storage.exists() {
        std::fs::create_dir_all(&storage)
            .with_context(|| format!("creating storage directory {}", storage.display()))?;
        log::info!("created storage directory at {}", storage.display());
    } else {
        log::debug!("storage directory already exists at {}, skipping", storage.display());
    }

    Ok(config_dir.to_path_buf())
}

/// File-backed history for the configured storage dir and key.
pub fn open_history(config: &Config, config_path: &Path) -> HistoryStore<FileStore> {
    let dir = config::resolve_storage_dir(config, config_path);
    HistoryStore::new(FileStore::new(dir), config.chat.storage_key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_config_and_storage() {
        let dir = std::env::temp_dir().join(format!("tanya-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        let out = init_config_dir(&config_path).unwrap();
        assert_eq!(out, dir);
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");
        assert!(dir.join("storage").is_dir());

        // Second run keeps an edited config.
        std::fs::write(&config_path, r#"{"chat":{"storageKey":"k"}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(open_history(&config, &config_path).key(), "k");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
