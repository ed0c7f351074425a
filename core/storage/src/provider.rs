//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use enkrypt_common::{BlobKey, Error, Result};

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Key of the blob.
    pub key: BlobKey,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// ETag or revision ID; changes whenever the content is replaced.
    pub etag: String,
}

/// Opaque blob store.
///
/// Stores and returns exactly the bytes written under a key. Writes replace
/// existing blobs. A store may refuse a key that is a strict prefix of a
/// stored key, or has one as a prefix, with `AlreadyExists`; the stored
/// blob is then left untouched. Implementations handle their own locking.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store `data` under `key`, replacing any existing blob.
    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<BlobMetadata>;

    /// Fetch the blob stored under `key`.
    ///
    /// # Errors
    /// - `NotFound` if there is no such blob
    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>>;

    /// Check if a blob exists.
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - `NotFound` if there is no such blob
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Delete several blobs, ignoring keys that do not exist.
    ///
    /// Returns how many blobs were removed.
    async fn delete_many(&self, keys: &[BlobKey]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            match self.delete(key).await {
                Ok(()) => removed += 1,
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Copy a blob, replacing the destination if present.
    async fn copy(&self, from: &BlobKey, to: &BlobKey) -> Result<BlobMetadata> {
        let data = self.get(from).await?;
        self.put(to, data).await
    }

    /// Move a blob to a new key.
    async fn rename(&self, from: &BlobKey, to: &BlobKey) -> Result<BlobMetadata> {
        let metadata = self.copy(from, to).await?;
        if from != to {
            self.delete(from).await?;
        }
        Ok(metadata)
    }

    /// List blobs whose key starts with `prefix`, sorted by key.
    ///
    /// The prefix is matched against the joined key string, so `"logs/"`
    /// and `"logs/2020"` both work. An empty prefix lists everything.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>>;

    /// Get metadata for a blob.
    ///
    /// # Errors
    /// - `NotFound` if there is no such blob
    async fn metadata(&self, key: &BlobKey) -> Result<BlobMetadata>;

    /// URL granting time-limited read access to a blob.
    ///
    /// # Errors
    /// - `NotFound` if there is no such blob
    /// - `InvalidInput` if `ttl` is zero or out of range
    async fn presigned_url(&self, key: &BlobKey, ttl: Duration) -> Result<Url>;
}

/// Expiry timestamp for a presigned URL.
pub(crate) fn expiry(ttl: Duration) -> Result<DateTime<Utc>> {
    if ttl.is_zero() {
        return Err(Error::InvalidInput("Presign TTL must be positive".to_string()));
    }
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| Error::InvalidInput(format!("Presign TTL out of range: {}", e)))?;
    Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| Error::InvalidInput("Presign TTL out of range".to_string()))
}

/// Sort listings the same way in every backend.
pub(crate) fn sort_listing(entries: &mut [BlobMetadata]) {
    entries.sort_by_key(|meta| meta.key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalStore;
    use crate::memory::MemoryStore;

    fn key(s: &str) -> BlobKey {
        BlobKey::parse(s).unwrap()
    }

    fn keys_of(entries: Vec<BlobMetadata>) -> Vec<String> {
        entries.into_iter().map(|m| m.key.to_string()).collect()
    }

    /// Behavior every backend must share.
    async fn exercise_contract(store: &dyn BlobStore) {
        let data: Vec<u8> = (0..=255u8).collect();
        let meta = store.put(&key("docs/a"), data.clone()).await.unwrap();
        assert_eq!(meta.size, 256);
        assert_eq!(store.get(&key("docs/a")).await.unwrap(), data);

        store.put(&key("docs/a"), vec![1, 2]).await.unwrap();
        assert_eq!(store.get(&key("docs/a")).await.unwrap(), vec![1, 2]);
        assert_eq!(store.metadata(&key("docs/a")).await.unwrap().size, 2);

        store.put(&key("docs/b"), vec![3]).await.unwrap();
        store.put(&key("other"), vec![4]).await.unwrap();
        assert_eq!(keys_of(store.list("docs/").await.unwrap()), vec!["docs/a", "docs/b"]);
        assert_eq!(
            keys_of(store.list("").await.unwrap()),
            vec!["docs/a", "docs/b", "other"]
        );

        store.copy(&key("docs/b"), &key("docs/a")).await.unwrap();
        assert_eq!(store.get(&key("docs/a")).await.unwrap(), vec![3]);
        store.rename(&key("other"), &key("moved/other")).await.unwrap();
        assert!(!store.exists(&key("other")).await.unwrap());
        assert_eq!(store.get(&key("moved/other")).await.unwrap(), vec![4]);

        assert!(matches!(store.get(&key("missing")).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete(&key("missing")).await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.presigned_url(&key("docs/a"), Duration::ZERO).await,
            Err(Error::InvalidInput(_))
        ));

        // prefix keys: stored exactly, or refused without touching the stored blob
        store.put(&key("nest/leaf"), vec![5]).await.unwrap();
        match store.put(&key("nest"), vec![6]).await {
            Ok(_) => assert_eq!(store.get(&key("nest")).await.unwrap(), vec![6]),
            Err(e) => assert!(matches!(e, Error::AlreadyExists(_)), "unexpected error: {}", e),
        }
        assert_eq!(store.get(&key("nest/leaf")).await.unwrap(), vec![5]);

        store.put(&key("solo"), vec![7]).await.unwrap();
        match store.put(&key("solo/child"), vec![8]).await {
            Ok(_) => assert_eq!(store.get(&key("solo/child")).await.unwrap(), vec![8]),
            Err(e) => assert!(matches!(e, Error::AlreadyExists(_)), "unexpected error: {}", e),
        }
        assert_eq!(store.get(&key("solo")).await.unwrap(), vec![7]);

        let all: Vec<BlobKey> = store
            .list("")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(store.delete_many(&all).await.unwrap(), all.len());
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        exercise_contract(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_local_store_contract() {
        let dir = tempfile::TempDir::new().unwrap();
        exercise_contract(&LocalStore::new(dir.path()).unwrap()).await;
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = BlobMetadata {
            key: BlobKey::parse("uploads/report.bin").unwrap(),
            size: 1024,
            modified: Utc::now(),
            etag: "abc123".to_string(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: BlobMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, metadata);
        assert!(json.contains("\"uploads/report.bin\""));
    }

    #[test]
    fn test_expiry_rejects_zero() {
        assert!(expiry(Duration::ZERO).is_err());
        let at = expiry(Duration::from_secs(60)).unwrap();
        assert!(at > Utc::now());
    }
}
