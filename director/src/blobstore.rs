//! Blobstore seam and the fetch-then-delete helper.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Errors from the blobstore transport.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob does not exist (or was already consumed).
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Transport failure.
    #[error("blobstore error: {0}")]
    Transport(String),
}

/// Server-side blob storage the agents and director share.
#[async_trait]
pub trait Blobstore: Send + Sync {
    /// Fetch a blob's bytes.
    async fn get(&self, id: &str) -> Result<Vec<u8>, BlobError>;

    /// Delete a blob. Deleting an unknown id is an error.
    async fn delete(&self, id: &str) -> Result<(), BlobError>;
}

/// Fetch a blob, then delete it regardless of the fetch outcome.
///
/// Agents park large payloads (log bundles, compile logs, exception
/// details) in the blobstore and reference them by id in RPC replies;
/// each reference is single-use. Delete failures are logged, never
/// raised. A crash between fetch and use loses the blob; that window is
/// accepted.
pub async fn download_and_delete_blob(
    blobstore: &dyn Blobstore,
    id: &str,
) -> Result<Vec<u8>, BlobError> {
    let fetched = blobstore.get(id).await;

    if let Err(e) = blobstore.delete(id).await {
        warn!(blob_id = %id, error = %e, "Failed to delete consumed blob");
    }

    fetched
}

/// Map-backed blobstore for tests and loopback deployments.
#[derive(Default)]
pub struct InMemoryBlobstore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobstore {
    /// Create an empty blobstore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob.
    pub async fn put(&self, id: &str, bytes: Vec<u8>) {
        self.blobs.write().await.insert(id.to_string(), bytes);
    }

    /// Whether a blob is still present.
    pub async fn contains(&self, id: &str) -> bool {
        self.blobs.read().await.contains_key(id)
    }
}

#[async_trait]
impl Blobstore for InMemoryBlobstore {
    async fn get(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), BlobError> {
        self.blobs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_returns_bytes_and_deletes() {
        let store = InMemoryBlobstore::new();
        store.put("b1", b"payload".to_vec()).await;

        let bytes = download_and_delete_blob(&store, "b1").await.unwrap();

        assert_eq!(bytes, b"payload");
        assert!(!store.contains("b1").await);
    }

    #[tokio::test]
    async fn test_download_missing_blob_errors() {
        let store = InMemoryBlobstore::new();
        let result = download_and_delete_blob(&store, "nope").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }
}
