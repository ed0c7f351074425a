//! Blob store adapter that keeps only sealed containers at rest.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, warn};

use crate::provider::{BlobMetadata, BlobStore};
use enkrypt_common::{BlobKey, Error, Result, SensitiveBytes};
use enkrypt_crypto::{decrypt_bytes, decrypt_to_path, encrypt_bytes, CodecConfig, Encryptor};

/// Seals blobs on the way in and opens them on the way out.
///
/// Every blob written through this adapter is a complete container, so the
/// underlying store never sees plaintext. The KDF work and the cipher run on
/// the blocking pool.
pub struct SealedStore {
    store: Arc<dyn BlobStore>,
    password: SensitiveBytes,
    config: CodecConfig,
}

impl SealedStore {
    /// Wrap `store`, sealing with `password` under `config`.
    ///
    /// # Errors
    /// - `InvalidInput` if the password is empty or the config is invalid
    pub fn new(
        store: Arc<dyn BlobStore>,
        password: SensitiveBytes,
        config: CodecConfig,
    ) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }
        config.validate()?;
        Ok(Self {
            store,
            password,
            config,
        })
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Seal `plaintext` and store the container under `key`.
    pub async fn put_sealed(&self, key: &BlobKey, plaintext: Vec<u8>) -> Result<BlobMetadata> {
        let password = self.password.clone();
        let config = self.config.clone();
        let container = run_blocking(move || {
            encrypt_bytes(password.as_bytes(), &plaintext, &config)
        })
        .await?;

        debug!(key = %key, size = container.len(), "Storing sealed blob");
        self.store.put(key, container).await
    }

    /// Fetch the container under `key` and return its verified plaintext.
    ///
    /// # Errors
    /// - `NotFound` if there is no such blob
    /// - `Authentication` if the container was modified or the password is wrong
    pub async fn get_opened(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let container = self.store.get(key).await?;
        let password = self.password.clone();
        let config = self.config.clone();

        let result = run_blocking(move || {
            decrypt_bytes(password.as_bytes(), &container, &config)
        })
        .await;
        if let Err(Error::Authentication(_)) = &result {
            warn!(key = %key, "Sealed blob failed authentication");
        }
        result
    }

    /// Seal the file at `path` and store it under `key`.
    pub async fn upload_file(&self, key: &BlobKey, path: impl AsRef<Path>) -> Result<BlobMetadata> {
        let path = path.as_ref().to_path_buf();
        let password = self.password.clone();
        let config = self.config.clone();

        let container = run_blocking(move || {
            let source = BufReader::new(File::open(&path)?);
            let encryptor = Encryptor::initialize(password.as_bytes(), &config)?;
            encryptor.encrypt(source, Vec::new())
        })
        .await?;

        debug!(key = %key, size = container.len(), "Uploading sealed file");
        self.store.put(key, container).await
    }

    /// Fetch the blob under `key` and write its plaintext to `path`.
    ///
    /// Returns the plaintext length. Under the default release policy the
    /// plaintext is staged next to `path` and only moved into place once the
    /// container verifies; otherwise a partial `path` is removed on failure.
    pub async fn download_file(&self, key: &BlobKey, path: impl AsRef<Path>) -> Result<u64> {
        let container = self.store.get(key).await?;
        let path = path.as_ref().to_path_buf();
        let password = self.password.clone();
        let config = self.config.clone();

        let result = run_blocking(move || {
            let container_len = container.len() as u64;
            decrypt_to_path(password.as_bytes(), &config, container.as_slice(), container_len, &path)
        })
        .await;
        if let Err(Error::Authentication(_)) = &result {
            warn!(key = %key, "Sealed blob failed authentication");
        }
        result
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Crypto(format!("Codec task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use enkrypt_crypto::{KdfParams, ReleasePolicy, OVERHEAD};
    use tempfile::TempDir;

    fn fast_config() -> CodecConfig {
        CodecConfig::default()
            .with_kdf(KdfParams::Scrypt { log_n: 4, r: 8, p: 1 })
            .with_chunk_size(7)
    }

    fn sealed(store: Arc<dyn BlobStore>, password: &str) -> SealedStore {
        SealedStore::new(store, SensitiveBytes::from(password), fast_config()).unwrap()
    }

    fn key(s: &str) -> BlobKey {
        BlobKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_put_sealed_get_opened() {
        let memory = Arc::new(MemoryStore::new());
        let store = sealed(memory.clone(), "password");
        let plaintext = b"attack at dawn".to_vec();

        let meta = store.put_sealed(&key("notes/a"), plaintext.clone()).await.unwrap();
        assert_eq!(meta.size, (plaintext.len() + OVERHEAD) as u64);

        let raw = memory.get(&key("notes/a")).await.unwrap();
        assert!(!raw.windows(plaintext.len()).any(|w| w == plaintext.as_slice()));

        assert_eq!(store.get_opened(&key("notes/a")).await.unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let memory: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        sealed(memory.clone(), "right")
            .put_sealed(&key("k"), b"secret".to_vec())
            .await
            .unwrap();

        let result = sealed(memory, "wrong").get_opened(&key("k")).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_tampered_blob_rejected() {
        let memory = Arc::new(MemoryStore::new());
        let store = sealed(memory.clone(), "password");
        store.put_sealed(&key("k"), b"secret data".to_vec()).await.unwrap();

        let mut raw = memory.get(&key("k")).await.unwrap();
        raw[50] ^= 0x01;
        memory.put(&key("k"), raw).await.unwrap();

        assert!(matches!(
            store.get_opened(&key("k")).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = sealed(Arc::new(MemoryStore::new()), "password");
        assert!(matches!(
            store.get_opened(&key("missing")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &data).unwrap();

        let store = sealed(Arc::new(MemoryStore::new()), "password");
        store.upload_file(&key("files/input"), &input).await.unwrap();

        let written = store.download_file(&key("files/input"), &output).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(std::fs::read(&output).unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_download_removes_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.txt");
        let memory: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());

        sealed(memory.clone(), "right")
            .put_sealed(&key("k"), vec![7u8; 100])
            .await
            .unwrap();

        let result = sealed(memory, "wrong").download_file(&key("k"), &output).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_download_removes_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.txt");
        let memory = Arc::new(MemoryStore::new());
        let store = SealedStore::new(
            memory.clone(),
            SensitiveBytes::from("password"),
            fast_config().with_release(ReleasePolicy::Streaming),
        )
        .unwrap();

        store.put_sealed(&key("k"), vec![3u8; 64]).await.unwrap();
        let mut raw = memory.get(&key("k")).await.unwrap();
        raw[60] ^= 0x80;
        memory.put(&key("k"), raw).await.unwrap();

        let result = store.download_file(&key("k"), &output).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_password_rejected() {
        let result = SealedStore::new(
            Arc::new(MemoryStore::new()),
            SensitiveBytes::new(Vec::new()),
            fast_config(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
