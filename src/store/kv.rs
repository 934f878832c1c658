//! Durable key-value persistence layer

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

use super::errors::{StoreError, StoreResult};

/// The local durable persistence interface the engine consumes.
///
/// Values are JSON documents addressed by `(collection, key)`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>>;
    fn put(&self, collection: &str, key: &str, value: &Value) -> StoreResult<()>;
    fn delete(&self, collection: &str, key: &str) -> StoreResult<()>;
    fn clear_all(&self) -> StoreResult<()>;
}

fn check_component(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(StoreError::InvalidKey(name.to_string()));
    }
    Ok(())
}

/// File-backed store: one JSON file per key under
/// `<root>/<collection>/<key>.json`.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, collection: &str, key: &str) -> StoreResult<PathBuf> {
        check_component(collection)?;
        check_component(key)?;
        Ok(self.root.join(collection).join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        let path = self.path_for(collection, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn put(&self, collection: &str, key: &str, value: &Value) -> StoreResult<()> {
        let path = self.path_for(collection, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a replace is atomic: readers see either
        // the old document or the new one, never a torn write.
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        let path = self.path_for(collection, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_all(&self) -> StoreResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(&(collection.to_string(), key.to_string())).cloned())
    }

    fn put(&self, collection: &str, key: &str, value: &Value) -> StoreResult<()> {
        let mut data = self.data.lock().unwrap();
        data.insert((collection.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        let mut data = self.data.lock().unwrap();
        data.remove(&(collection.to_string(), key.to_string()));
        Ok(())
    }

    fn clear_all(&self) -> StoreResult<()> {
        self.data.lock().unwrap().clear();
        Ok(())
    }
}
