//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::provider::{expiry, sort_listing, BlobMetadata, BlobStore};
use enkrypt_common::{BlobKey, Error, Result};

/// Prefix of in-flight temporary files; never listed.
const TEMP_PREFIX: &str = ".enkrypt-tmp-";

/// Local filesystem blob store.
///
/// Each key segment becomes a directory level under the root. Directories
/// are created on demand and pruned when they become empty.
///
/// Because a path cannot be both a file and a directory, a key cannot be
/// stored while it is a strict prefix of another stored key, or the other
/// way round: `put("a")` after `put("a/b")` fails with `AlreadyExists` and
/// leaves the existing blob untouched.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    /// - Root is stored as an absolute path
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        // sync for constructor
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }

        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, key: &BlobKey) -> PathBuf {
        let mut fs_path = self.root.clone();
        for segment in key.segments() {
            fs_path.push(segment);
        }
        fs_path
    }

    fn create_metadata(key: &BlobKey, fs_meta: &std::fs::Metadata) -> BlobMetadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobMetadata {
            key: key.clone(),
            size: fs_meta.len(),
            modified,
            etag: format!(
                "{}-{}",
                modified.timestamp_nanos_opt().unwrap_or_default(),
                fs_meta.len()
            ),
        }
    }

    /// Metadata of the file behind `key`, or `NotFound`.
    async fn file_metadata(&self, key: &BlobKey) -> Result<std::fs::Metadata> {
        match fs::metadata(self.to_fs_path(key)).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(Error::NotFound(format!("Blob not found: {}", key))),
            Err(e) => Err(map_not_found(e, key)),
        }
    }

    /// Remove empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // fails on non-empty directories, which ends the walk
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Reject keys whose path would collide with a stored blob's path.
    async fn check_placement(&self, key: &BlobKey) -> Result<()> {
        if let Ok(meta) = fs::metadata(self.to_fs_path(key)).await {
            if meta.is_dir() {
                return Err(Error::AlreadyExists(format!(
                    "Key {} is a prefix of stored blobs",
                    key
                )));
            }
        }

        let segments = key.segments();
        let mut ancestor = self.root.clone();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            ancestor.push(segment);
            match fs::metadata(&ancestor).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::AlreadyExists(format!(
                        "Key {} is nested under a stored blob",
                        key
                    )));
                }
                // nothing stored below this level yet
                Err(_) => break,
            }
        }
        Ok(())
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn map_not_found(e: std::io::Error, key: &BlobKey) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("Blob not found: {}", key))
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<BlobMetadata> {
        self.check_placement(key).await?;
        let fs_path = self.to_fs_path(key);
        Self::ensure_parent(&fs_path).await?;

        // write next to the target, then rename so readers never see a partial blob
        let temp_path = fs_path.with_file_name(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        if let Err(e) = fs::write(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &fs_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Blob stored");
        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(Self::create_metadata(key, &fs_meta))
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>> {
        self.file_metadata(key).await?;
        fs::read(self.to_fs_path(key))
            .await
            .map_err(|e| map_not_found(e, key))
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        match self.file_metadata(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.file_metadata(key).await?;
        let fs_path = self.to_fs_path(key);
        fs::remove_file(&fs_path)
            .await
            .map_err(|e| map_not_found(e, key))?;
        self.prune_empty_parents(&fs_path).await;
        Ok(())
    }

    async fn rename(&self, from: &BlobKey, to: &BlobKey) -> Result<BlobMetadata> {
        self.file_metadata(from).await?;
        if from == to {
            return self.metadata(to).await;
        }
        self.check_placement(to).await?;
        let from_path = self.to_fs_path(from);
        let to_path = self.to_fs_path(to);

        Self::ensure_parent(&to_path).await?;
        fs::rename(&from_path, &to_path).await?;
        self.prune_empty_parents(&from_path).await;

        let fs_meta = fs::metadata(&to_path).await?;
        Ok(Self::create_metadata(to, &fs_meta))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        let mut results = Vec::new();
        let mut pending: Vec<(PathBuf, Vec<String>)> = vec![(self.root.clone(), Vec::new())];

        while let Some((dir, segments)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(TEMP_PREFIX) {
                    continue;
                }

                let mut child_segments = segments.clone();
                child_segments.push(name);

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child_segments));
                } else if file_type.is_file() {
                    // names the store could not have written are skipped
                    let Ok(key) = BlobKey::from_segments(child_segments) else {
                        continue;
                    };
                    if key.has_prefix(prefix) {
                        let fs_meta = entry.metadata().await?;
                        results.push(Self::create_metadata(&key, &fs_meta));
                    }
                }
            }
        }

        sort_listing(&mut results);
        Ok(results)
    }

    async fn metadata(&self, key: &BlobKey) -> Result<BlobMetadata> {
        let fs_meta = self.file_metadata(key).await?;
        Ok(Self::create_metadata(key, &fs_meta))
    }

    async fn presigned_url(&self, key: &BlobKey, ttl: Duration) -> Result<Url> {
        self.file_metadata(key).await?;
        let expires = expiry(ttl)?;

        let mut url = Url::from_file_path(self.to_fs_path(key))
            .map_err(|_| Error::Storage(format!("Cannot build file URL for {}", key)))?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.timestamp().to_string());

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> BlobKey {
        BlobKey::parse(s).unwrap()
    }

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_nested() {
        let (_dir, store) = store();
        let data = b"Hello, World!".to_vec();

        store.put(&key("a/b/c.bin"), data.clone()).await.unwrap();
        assert_eq!(store.get(&key("a/b/c.bin")).await.unwrap(), data);
        assert!(store.root().join("a").join("b").join("c.bin").is_file());
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let (_dir, store) = store();
        assert!(!store.exists(&key("nope")).await.unwrap());
        assert!(matches!(store.get(&key("nope")).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete(&key("nope")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_blob() {
        let (_dir, store) = store();
        store.put(&key("dir/file"), vec![1]).await.unwrap();
        assert!(!store.exists(&key("dir")).await.unwrap());
        assert!(matches!(store.get(&key("dir")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let (_dir, store) = store();
        store.put(&key("x/y/z"), vec![1]).await.unwrap();
        store.delete(&key("x/y/z")).await.unwrap();

        assert!(!store.root().join("x").exists());
        assert!(store.root().exists());
    }

    #[tokio::test]
    async fn test_rename_and_copy() {
        let (_dir, store) = store();
        store.put(&key("old/file"), vec![1, 2, 3]).await.unwrap();

        store.copy(&key("old/file"), &key("copy")).await.unwrap();
        store.rename(&key("old/file"), &key("new/file")).await.unwrap();

        assert!(!store.exists(&key("old/file")).await.unwrap());
        assert_eq!(store.get(&key("new/file")).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.get(&key("copy")).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let (_dir, store) = store();
        for k in ["logs/2020/a", "logs/2021/b", "other/c"] {
            store.put(&key(k), vec![0]).await.unwrap();
        }

        let listed: Vec<String> = store
            .list("logs/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key.to_string())
            .collect();
        assert_eq!(listed, vec!["logs/2020/a", "logs/2021/b"]);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_presigned_file_url() {
        let (_dir, store) = store();
        store.put(&key("share/me"), vec![1]).await.unwrap();

        let url = store
            .presigned_url(&key("share/me"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/share/me"));
        assert!(url.query_pairs().any(|(k, _)| k == "expires"));
    }

    #[tokio::test]
    async fn test_prefix_keys_conflict() {
        let (_dir, store) = store();
        store.put(&key("a/b"), vec![1]).await.unwrap();

        assert!(matches!(store.put(&key("a"), vec![2]).await, Err(Error::AlreadyExists(_))));
        assert!(matches!(
            store.put(&key("a/b/c"), vec![3]).await,
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(store.get(&key("a/b")).await.unwrap(), vec![1]);

        store.put(&key("x"), vec![4]).await.unwrap();
        assert!(matches!(
            store.rename(&key("x"), &key("a")).await,
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(store.get(&key("x")).await.unwrap(), vec![4]);
        assert_eq!(store.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_metadata_size() {
        let (_dir, store) = store();
        store.put(&key("sized"), vec![0u8; 42]).await.unwrap();
        assert_eq!(store.metadata(&key("sized")).await.unwrap().size, 42);
    }
}
