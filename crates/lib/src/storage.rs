//! Scoped key-value storage used to persist the chat log.
//!
//! `FileStore` keeps one JSON file per key under a directory (e.g. ~/.tanya/storage).
//! `MemoryStore` is an in-process map for tests and embedders without a disk.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous get/set/remove over string values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Remove the entry. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Keys become file names, so only `[A-Za-z0-9._-]` is allowed and dot-only names are refused.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && !key.chars().all(|c| c == '.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Directory-backed store: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.lock", key))
    }

    /// Hold an exclusive advisory lock for `key` while `f` runs.
    fn with_lock<T>(
        &self,
        key: &str,
        f: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(key))?;
        lock.lock_exclusive()?;
        let out = f();
        if let Err(e) = lock.unlock() {
            log::debug!("storage: unlock {} failed: {}", key, e);
        }
        out
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        match fs::read_to_string(self.value_path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.with_lock(key, || {
            let path = self.value_path(key);
            let tmp = self.dir.join(format!(".{}.json.tmp", key));
            {
                let mut f = fs::File::create(&tmp)?;
                f.write_all(value.as_bytes())?;
                f.sync_all()?;
            }
            fs::rename(&tmp, &path)?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        if !self.dir.exists() {
            return Ok(());
        }
        self.with_lock(key, || match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
    }
}

/// In-memory store. Wrap in `Arc` to share between a session and a test harness.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.remove(key);
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tanya-storage-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = MemoryStore::new();
        for key in ["", "..", "../etc", "a/b", "chat messages"] {
            assert!(matches!(store.set(key, "x"), Err(StorageError::InvalidKey(_))), "{key}");
        }
        assert!(store.set("chat-messages.v1_x", "x").is_ok());
    }

    #[test]
    fn file_store_set_get_remove() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        assert_eq!(store.get("chat-messages").unwrap(), None);

        store.set("chat-messages", "[1]").unwrap();
        store.set("chat-messages", "[1,2]").unwrap();
        assert_eq!(store.get("chat-messages").unwrap().as_deref(), Some("[1,2]"));
        assert!(dir.join("chat-messages.json").exists());

        store.remove("chat-messages").unwrap();
        assert_eq!(store.get("chat-messages").unwrap(), None);
        store.remove("chat-messages").unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_remove_without_dir_is_ok() {
        let store = FileStore::new(temp_dir());
        assert!(store.remove("chat-messages").is_ok());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert!(store.contains("k"));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert!(!store.contains("k"));
    }
}
