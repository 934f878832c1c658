//! In-memory remote store for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RemoteError, RemoteObject, RemoteResult, RemoteStore};

struct StoredObject {
    container_id: String,
    name: String,
    bytes: Vec<u8>,
    modified_time: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    /// container name -> container id
    containers: HashMap<String, String>,
    /// object id -> object
    objects: HashMap<String, StoredObject>,
}

/// Test double: a remote store held in memory, with an offline switch
/// and write counters for asserting "zero remote writes" behavior.
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    offline: AtomicBool,
    fail_put_named: Mutex<Option<String>>,
    puts: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make puts of one specific object name fail with `Unavailable`
    /// (mid-drain failure injection)
    pub fn fail_puts_named(&self, name: Option<&str>) {
        *self.fail_put_named.lock().unwrap() = name.map(str::to_string);
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Write counters combined (for "no remote writes" assertions)
    pub fn write_count(&self) -> u64 {
        self.put_count() + self.delete_count()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("offline".to_string()))
        } else {
            Ok(())
        }
    }

    /// Direct read of an object's bytes by container name and object
    /// name, bypassing the trait (test assertions)
    pub fn object_bytes(&self, container_name: &str, object_name: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let container_id = inner.containers.get(container_name)?;
        inner
            .objects
            .values()
            .find(|o| &o.container_id == container_id && o.name == object_name)
            .map(|o| o.bytes.clone())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn find_or_create_container(
        &self,
        name: &str,
        _parent_id: Option<&str>,
    ) -> RemoteResult<String> {
        self.check_online()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.containers.get(name) {
            return Ok(id.clone());
        }
        let id = Uuid::new_v4().to_string();
        inner.containers.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn list_objects(&self, container_id: &str) -> RemoteResult<Vec<RemoteObject>> {
        self.check_online()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .iter()
            .filter(|(_, o)| o.container_id == container_id)
            .map(|(id, o)| RemoteObject {
                id: id.clone(),
                name: o.name.clone(),
                modified_time: o.modified_time,
            })
            .collect())
    }

    async fn get_object_bytes(&self, object_id: &str) -> RemoteResult<Vec<u8>> {
        self.check_online()?;
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(object_id)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(object_id.to_string()))
    }

    async fn put_object(
        &self,
        container_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> RemoteResult<String> {
        self.check_online()?;
        if self.fail_put_named.lock().unwrap().as_deref() == Some(name) {
            return Err(RemoteError::Unavailable(format!("injected failure for {}", name)));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        inner.objects.insert(
            id.clone(),
            StoredObject {
                container_id: container_id.to_string(),
                name: name.to_string(),
                bytes: bytes.to_vec(),
                modified_time: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn delete_object(&self, object_id: &str) -> RemoteResult<()> {
        self.check_online()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.objects.remove(object_id).is_none() {
            return Err(RemoteError::NotFound(object_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_container_is_stable() {
        let remote = MemoryRemote::new();
        let a = remote.find_or_create_container("notes", None).await.unwrap();
        let b = remote.find_or_create_container("notes", None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_object_lifecycle() {
        let remote = MemoryRemote::new();
        let container = remote.find_or_create_container("notes", None).await.unwrap();

        let id = remote.put_object(&container, "a.json", b"data").await.unwrap();
        assert_eq!(remote.get_object_bytes(&id).await.unwrap(), b"data");
        assert_eq!(remote.list_objects(&container).await.unwrap().len(), 1);

        remote.delete_object(&id).await.unwrap();
        assert!(matches!(
            remote.delete_object(&id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_switch() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert!(matches!(
            remote.find_or_create_container("notes", None).await,
            Err(RemoteError::Unavailable(_))
        ));
        remote.set_offline(false);
        assert!(remote.find_or_create_container("notes", None).await.is_ok());
    }
}
