//! External bulk storage for compacted context payloads.
//!
//! Payloads are written once under a content-derived id and never mutated.
//! Only the context store talks to these.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), EngineError>;

    /// `Ok(None)` when nothing is stored under `id`
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, EngineError>;
}

/// Stores each payload as `<root>/<id>.json`
#[derive(Debug, Clone)]
pub struct FsBulkStore {
    root: PathBuf,
}

impl FsBulkStore {
    /// Payloads go under `<data_dir>/refs`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("refs"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, EngineError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::Storage(format!("invalid reference id '{}'", id)));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl BulkStore for FsBulkStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), EngineError> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Same id means same content
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let tmp = self.root.join(format!("{}.json.tmp", id));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryBulkStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBulkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop a payload, simulating an inconsistent store
    pub async fn evict(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl BulkStore for MemoryBulkStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.entries.write().await.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.entries.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBulkStore::new(dir.path());

        store.put("abc123", b"[1,2,3]".to_vec()).await.unwrap();
        assert!(store.root().join("abc123.json").exists());
        assert_eq!(store.get("abc123").await.unwrap(), Some(b"[1,2,3]".to_vec()));
        assert_eq!(store.get("ffff").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBulkStore::new(dir.path());

        assert!(matches!(
            store.put("../escape", vec![]).await,
            Err(EngineError::Storage(_))
        ));
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBulkStore::new();
        assert!(store.is_empty().await);
        store.put("a", vec![1]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1]));
        assert!(store.evict("a").await);
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
