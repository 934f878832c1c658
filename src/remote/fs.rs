//! Directory-backed remote store.
//!
//! Containers are directories under a root, objects are files, object
//! ids are root-relative paths. Useful against a mounted/synced folder
//! and as an integration target.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteError, RemoteObject, RemoteResult, RemoteStore};

pub struct FsRemote {
    root: PathBuf,
}

impl FsRemote {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn check_component(name: &str) -> RemoteResult<()> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(RemoteError::Backend(format!("invalid name: {}", name)));
        }
        Ok(())
    }

    fn resolve(&self, object_id: &str) -> RemoteResult<PathBuf> {
        let mut path = self.root.clone();
        for component in object_id.split('/') {
            Self::check_component(component)?;
            path.push(component);
        }
        Ok(path)
    }

    fn io_error(e: std::io::Error, what: &str) -> RemoteError {
        match e.kind() {
            std::io::ErrorKind::NotFound => RemoteError::NotFound(what.to_string()),
            _ => RemoteError::Unavailable(e.to_string()),
        }
    }
}

fn modified_time(path: &Path) -> DateTime<Utc> {
    path.metadata()
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl RemoteStore for FsRemote {
    async fn find_or_create_container(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> RemoteResult<String> {
        Self::check_component(name)?;
        let id = match parent_id {
            Some(parent) => format!("{}/{}", parent, name),
            None => name.to_string(),
        };
        let path = self.resolve(&id)?;
        std::fs::create_dir_all(&path).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(id)
    }

    async fn list_objects(&self, container_id: &str) -> RemoteResult<Vec<RemoteObject>> {
        let dir = self.resolve(container_id)?;
        let entries = std::fs::read_dir(&dir).map_err(|e| Self::io_error(e, container_id))?;

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RemoteError::Unavailable(e.to_string()))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            objects.push(RemoteObject {
                id: format!("{}/{}", container_id, name),
                name,
                modified_time: modified_time(&entry.path()),
            });
        }
        Ok(objects)
    }

    async fn get_object_bytes(&self, object_id: &str) -> RemoteResult<Vec<u8>> {
        let path = self.resolve(object_id)?;
        std::fs::read(&path).map_err(|e| Self::io_error(e, object_id))
    }

    async fn put_object(
        &self,
        container_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> RemoteResult<String> {
        Self::check_component(name)?;
        let id = format!("{}/{}", container_id, name);
        let path = self.resolve(&id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(id)
    }

    async fn delete_object(&self, object_id: &str) -> RemoteResult<()> {
        let path = self.resolve(object_id)?;
        std::fs::remove_file(&path).map_err(|e| Self::io_error(e, object_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_object_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsRemote::new(dir.path().to_path_buf());

        let container = remote.find_or_create_container("notes", None).await.unwrap();
        let id = remote.put_object(&container, "n1.json", b"{}").await.unwrap();

        let listed = remote.list_objects(&container).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "n1.json");

        assert_eq!(remote.get_object_bytes(&id).await.unwrap(), b"{}");
        remote.delete_object(&id).await.unwrap();
        assert!(matches!(
            remote.delete_object(&id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_nested_container() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsRemote::new(dir.path().to_path_buf());

        let parent = remote.find_or_create_container("account", None).await.unwrap();
        let child = remote
            .find_or_create_container("notes", Some(&parent))
            .await
            .unwrap();
        assert_eq!(child, "account/notes");
        assert!(dir.path().join("account/notes").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FsRemote::new(dir.path().to_path_buf());
        assert!(remote.find_or_create_container("..", None).await.is_err());
        assert!(remote.get_object_bytes("notes/../../etc").await.is_err());
    }
}
