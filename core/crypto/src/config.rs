//! Codec configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::kdf::KdfParams;
use enkrypt_common::{Error, Result};

/// Default chunk size for streaming (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// When decrypted bytes reach the caller's sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Hold plaintext until the tag verifies; the sink sees nothing on failure.
    ///
    /// Peak memory grows with the plaintext size.
    #[default]
    VerifyFirst,
    /// Write each chunk as soon as it is decrypted.
    ///
    /// The sink receives unauthenticated plaintext before the tag is checked
    /// and must be discarded by the caller if decryption fails.
    Streaming,
}

/// Settings shared by encryption and decryption.
///
/// `kdf` is not recorded in the container, so every deployment reading a
/// container must use the same value as the one that wrote it. `chunk_size`
/// only bounds memory and never changes the container bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Bytes read, transformed and written per step.
    pub chunk_size: usize,
    /// Key-derivation parameters.
    pub kdf: KdfParams,
    /// Plaintext release policy for decryption.
    pub release: ReleasePolicy,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
            release: ReleasePolicy::default(),
        }
    }
}

impl CodecConfig {
    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the key-derivation parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Set the release policy.
    pub fn with_release(mut self, release: ReleasePolicy) -> Self {
        self.release = release;
        self
    }

    /// Check the configuration before use.
    ///
    /// # Errors
    /// - `InvalidInput` if `chunk_size` is zero
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("Chunk size must be positive".to_string()));
        }
        Ok(())
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}
