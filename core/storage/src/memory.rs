//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::provider::{expiry, sort_listing, BlobMetadata, BlobStore};
use enkrypt_common::{BlobKey, Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    metadata: BlobMetadata,
}

type Blobs = HashMap<BlobKey, Entry>;

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same storage.
#[derive(Clone)]
pub struct MemoryStore {
    id: Uuid,
    blobs: Arc<RwLock<Blobs>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Blobs>> {
        self.blobs
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Blobs>> {
        self.blobs
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn not_found(key: &BlobKey) -> Error {
        Error::NotFound(format!("Blob not found: {}", key))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<BlobMetadata> {
        let metadata = BlobMetadata {
            key: key.clone(),
            size: data.len() as u64,
            modified: Utc::now(),
            etag: Uuid::new_v4().to_string(),
        };

        self.write()?.insert(
            key.clone(),
            Entry {
                data,
                metadata: metadata.clone(),
            },
        );

        Ok(metadata)
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>> {
        self.read()?
            .get(key)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.read()?.contains_key(key))
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.write()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn rename(&self, from: &BlobKey, to: &BlobKey) -> Result<BlobMetadata> {
        let mut blobs = self.write()?;
        let mut entry = blobs.remove(from).ok_or_else(|| Self::not_found(from))?;

        entry.metadata.key = to.clone();
        entry.metadata.modified = Utc::now();
        entry.metadata.etag = Uuid::new_v4().to_string();
        let metadata = entry.metadata.clone();
        blobs.insert(to.clone(), entry);

        Ok(metadata)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        let mut results: Vec<BlobMetadata> = self
            .read()?
            .iter()
            .filter(|(key, _)| key.has_prefix(prefix))
            .map(|(_, entry)| entry.metadata.clone())
            .collect();
        sort_listing(&mut results);
        Ok(results)
    }

    async fn metadata(&self, key: &BlobKey) -> Result<BlobMetadata> {
        self.read()?
            .get(key)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn presigned_url(&self, key: &BlobKey, ttl: Duration) -> Result<Url> {
        if !self.exists(key).await? {
            return Err(Self::not_found(key));
        }
        let expires = expiry(ttl)?;

        let mut url = Url::parse(&format!("memory://{}/", self.id))
            .map_err(|e| Error::Storage(format!("Failed to build URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Storage("Memory URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(key.segments());
        url.query_pairs_mut()
            .append_pair("expires", &expires.timestamp().to_string());

        Ok(url)
    }
}
