// SPDX-License-Identifier: MIT OR Apache-2.0
//! The key/value blob-store seam.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from a blob store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service failed.
    #[error("blob store backend error: {0}")]
    Backend(String),

    /// A written object never became visible under its ETag.
    #[error("object {key} not visible with etag {etag}")]
    NotVisible {
        /// Object key.
        key: String,
        /// Expected ETag.
        etag: String,
    },
}

/// Key/value object storage with prefix listing and write-visibility waits —
/// the subset of an S3-style service the population layer needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's body, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write an object and return its ETag.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError>;

    /// Delete an object (absent objects are fine).
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Resolve once the object is visible with the given ETag.
    async fn wait_until_exists(&self, key: &str, etag: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and local runs. Writes are immediately visible.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    sequence: Mutex<u64>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        let mut sequence = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        *sequence += 1;
        format!("etag-{sequence}")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).map(|(_, body)| body.clone()))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        let etag = self.next_etag();
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), (etag.clone(), body));
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn wait_until_exists(&self, key: &str, etag: &str) -> Result<(), StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.get(key) {
            Some((stored, _)) if stored == etag => Ok(()),
            _ => Err(StoreError::NotVisible {
                key: key.to_string(),
                etag: etag.to_string(),
            }),
        }
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        (**self).put(key, body).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(prefix).await
    }

    async fn wait_until_exists(&self, key: &str, etag: &str) -> Result<(), StoreError> {
        (**self).wait_until_exists(key, etag).await
    }
}

/// Filesystem-backed store: keys map to paths under a root directory.
///
/// ETags are content hashes, so writes are immediately visible. Useful for
/// local runs; production deployments bind a real object service to
/// [`ObjectStore`] instead.
pub struct FsStore {
    root: std::path::PathBuf,
}

impl FsStore {
    /// A store rooted at `root` (created on demand).
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        let mut path = self.root.clone();
        for component in key.split('/') {
            path.push(component);
        }
        path
    }

    fn etag_of(body: &[u8]) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        body.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn collect_keys(
        &self,
        dir: &std::path::Path,
        rel: &str,
        keys: &mut Vec<String>,
    ) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            if entry.file_type()?.is_dir() {
                self.collect_keys(&entry.path(), &child, keys)?;
            } else {
                keys.push(child);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(key)) {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let etag = Self::etag_of(&body);
        std::fs::write(&path, body).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.collect_keys(&self.root, "", &mut keys)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn wait_until_exists(&self, key: &str, etag: &str) -> Result<(), StoreError> {
        match self.get(key).await? {
            Some(body) if Self::etag_of(&body) == etag => Ok(()),
            _ => Err(StoreError::NotVisible {
                key: key.to_string(),
                etag: etag.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        store.put("leaderboard/python/a", Vec::new()).await.unwrap();
        store.put("leaderboard/python/b", Vec::new()).await.unwrap();
        store.put("leaderboard/rust/a", Vec::new()).await.unwrap();
        store.put("users/a", Vec::new()).await.unwrap();

        let keys = store.list("leaderboard/python/").await.unwrap();
        assert_eq!(keys, vec!["leaderboard/python/a", "leaderboard/python/b"]);
    }

    #[tokio::test]
    async fn fs_store_round_trips_marker_keys() {
        let root = tempfile::TempDir::new().unwrap();
        let store = FsStore::new(root.path());
        let etag = store
            .put("leaderboard/python/socket/octocat:1.20", Vec::new())
            .await
            .unwrap();
        store
            .wait_until_exists("leaderboard/python/socket/octocat:1.20", &etag)
            .await
            .unwrap();
        let keys = store.list("leaderboard/python/socket/").await.unwrap();
        assert_eq!(keys, vec!["leaderboard/python/socket/octocat:1.20"]);

        store
            .delete("leaderboard/python/socket/octocat:1.20")
            .await
            .unwrap();
        assert!(store.list("leaderboard/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_until_exists_matches_etags() {
        let store = MemoryStore::new();
        let etag = store.put("users/octocat", b"{}".to_vec()).await.unwrap();
        store.wait_until_exists("users/octocat", &etag).await.unwrap();
        let err = store
            .wait_until_exists("users/octocat", "etag-999")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotVisible { .. }));
    }
}
