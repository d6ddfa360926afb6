//! Content-addressable store for binary payloads referenced by tasks.
//!
//! Tasks carry file ids, never raw bytes; the store owns the bytes once
//! registered. One store is shared by every remote worker on a queue.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::FileError;

pub type FileId = String;

/// A registered binary payload.
#[derive(Debug, Clone)]
pub struct FileAsset {
    pub id: FileId,
    pub byte_size: u64,
    pub content_hash: String,
    pub bytes: Vec<u8>,
}

impl FileAsset {
    fn new(id: FileId, bytes: Vec<u8>) -> Self {
        Self {
            byte_size: bytes.len() as u64,
            content_hash: content_hash(&bytes),
            id,
            bytes,
        }
    }
}

/// Hex sha-256 of a payload.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// In-memory asset store. The write lock serializes concurrent
/// registration; re-registering an id replaces the previous asset.
pub struct FileStore {
    assets: RwLock<HashMap<FileId, FileAsset>>,
}

impl FileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            assets: RwLock::new(HashMap::new()),
        })
    }

    /// Register a payload under a fresh id.
    pub async fn register(&self, bytes: Vec<u8>) -> FileAsset {
        self.register_with_id(Uuid::new_v4().to_string(), bytes).await
    }

    /// Register a payload under a caller-supplied id (file exchange uses
    /// the sender's id).
    pub async fn register_with_id(&self, id: FileId, bytes: Vec<u8>) -> FileAsset {
        let asset = FileAsset::new(id.clone(), bytes);
        debug!(
            file_id = %asset.id,
            byte_size = asset.byte_size,
            hash = %asset.content_hash,
            "File asset registered"
        );
        self.assets.write().await.insert(id, asset.clone());
        asset
    }

    pub async fn get(&self, id: &str) -> Result<FileAsset, FileError> {
        self.assets
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FileError::NotFound { id: id.to_string() })
    }

    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_assigns_size_and_hash() {
        let store = FileStore::new();
        let asset = store.register(b"hello".to_vec()).await;

        assert_eq!(asset.byte_size, 5);
        assert_eq!(asset.content_hash, content_hash(b"hello"));
        assert_eq!(asset.content_hash.len(), 64);

        let fetched = store.get(&asset.id).await.unwrap();
        assert_eq!(fetched.bytes, b"hello");
        assert_eq!(fetched.content_hash, asset.content_hash);
    }

    #[tokio::test]
    async fn identical_payloads_hash_identically() {
        let store = FileStore::new();
        let a = store.register(b"same".to_vec()).await;
        let b = store.register(b"same".to_vec()).await;
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[tokio::test]
    async fn reregistering_an_id_replaces_the_asset() {
        let store = FileStore::new();
        store
            .register_with_id("asset-1".to_string(), b"old".to_vec())
            .await;
        store
            .register_with_id("asset-1".to_string(), b"newer".to_vec())
            .await;

        let asset = store.get("asset-1").await.unwrap();
        assert_eq!(asset.bytes, b"newer");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = FileStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, FileError::NotFound { ref id } if id == "missing"));
    }
}
