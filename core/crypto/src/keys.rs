//! Key material with secure memory handling.
//!
//! Key and password types zeroize their memory on drop so secrets do not
//! outlive the operation that needed them.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::{derive_key, KdfParams};
use enkrypt_common::{Error, Result, SensitiveBytes};

/// Length of derived keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the key-derivation salt in bytes.
pub const SALT_LENGTH: usize = 32;

/// Length of the per-container nonce in bytes.
pub const NONCE_LENGTH: usize = 16;

/// Symmetric key derived from a password and salt.
///
/// Owned by exactly one encryption or decryption operation and dropped
/// (and zeroized) with it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt from the OS RNG.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice that must be exactly [`SALT_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let salt: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(salt))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Nonce for one container.
///
/// Must never repeat under the same key; a fresh one is drawn for every
/// encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LENGTH]);

impl Nonce {
    /// Generate a random nonce from the OS RNG.
    pub fn generate() -> Self {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        Self(nonce)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LENGTH] {
        &self.0
    }
}

/// Password and salt for one operation.
///
/// Encryption starts from [`Credentials::fresh`], decryption from the salt
/// recovered out of the container header.
#[derive(Debug, Clone)]
pub struct Credentials {
    password: SensitiveBytes,
    salt: Salt,
}

impl Credentials {
    /// Credentials with a newly generated salt.
    pub fn fresh(password: &[u8]) -> Self {
        Self::with_salt(password, Salt::generate())
    }

    /// Credentials for a known salt.
    pub fn with_salt(password: &[u8], salt: Salt) -> Self {
        Self {
            password: SensitiveBytes::new(password.to_vec()),
            salt,
        }
    }

    /// The salt to persist alongside the ciphertext.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Derive the key for these credentials.
    pub fn derive(&self, params: &KdfParams) -> Result<DerivedKey> {
        derive_key(self.password.as_bytes(), self.salt.as_bytes(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_nonce_generate() {
        let nonce1 = Nonce::generate();
        let nonce2 = Nonce::generate();

        assert_ne!(nonce1.as_bytes(), nonce2.as_bytes());
    }

    #[test]
    fn test_salt_from_slice_length() {
        assert!(Salt::from_slice(&[0u8; SALT_LENGTH]).is_ok());
        assert!(matches!(
            Salt::from_slice(&[0u8; 16]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_derived_key_debug_redacted() {
        let key = DerivedKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "DerivedKey([REDACTED])");
    }

    #[test]
    fn test_credentials_fresh_salt_differs() {
        let a = Credentials::fresh(b"password");
        let b = Credentials::fresh(b"password");
        assert_ne!(a.salt(), b.salt());
    }
}
