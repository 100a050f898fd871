//! Flag Storage Module
//!
//! Durable boolean flags that must survive process restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::StorageError;

/// Keyed boolean persistence.
///
/// Missing or unreadable keys read as `false`. Writes never fail from the
/// caller's point of view; implementations log what they cannot persist.
pub trait FlagStore: Send + Sync {
    fn get_bool(&self, key: &str) -> bool;

    fn set_bool(&self, key: &str, value: bool);
}

/// On-disk representation of one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredFlag {
    value: bool,
}

/// Flags stored as one JSON file per key.
pub struct FileFlagStore {
    storage_path: PathBuf,
}

impl FileFlagStore {
    /// Create a store rooted at `storage_path`, creating the directory.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();

        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create flag storage directory: {}", e);
        }

        debug!("Flag storage initialized at: {:?}", storage_path);

        Self { storage_path }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Keys name files directly, so only plain file-name characters are allowed.
    fn file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.storage_path.join(format!("{}.json", key)))
    }

    fn save(&self, key: &str, value: bool) -> Result<(), StorageError> {
        let file_path = self.file_path(key)?;
        let json = serde_json::to_string(&StoredFlag { value })
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        std::fs::write(file_path, json).map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Saved flag {} = {}", key, value);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<bool, StorageError> {
        let json = std::fs::read_to_string(self.file_path(key)?)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        serde_json::from_str::<StoredFlag>(&json)
            .map(|flag| flag.value)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Delete a stored flag
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let file_path = self.file_path(key)?;

        if file_path.exists() {
            std::fs::remove_file(&file_path).map_err(|e| StorageError::Io(e.to_string()))?;
            info!("Deleted stored flag: {}", key);
        }

        Ok(())
    }

    /// Check if a flag has been written
    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).map_or(false, |path| path.exists())
    }
}

impl FlagStore for FileFlagStore {
    fn get_bool(&self, key: &str) -> bool {
        if let Err(e) = self.file_path(key) {
            error!("Failed to read flag: {}", e);
            return false;
        }
        if !self.exists(key) {
            return false;
        }
        match self.load(key) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to read flag {}: {}", key, e);
                false
            }
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        if let Err(e) = self.save(key, value) {
            error!("Failed to persist flag {}: {}", key, e);
        }
    }
}

/// Process-local flags, for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, bool>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get_bool(&self, key: &str) -> bool {
        self.flags.lock().get(key).copied().unwrap_or(false)
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.flags.lock().insert(key.to_string(), value);
    }
}
