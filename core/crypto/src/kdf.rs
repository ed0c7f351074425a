//! Password-based key derivation.
//!
//! Both supported functions are memory-hard. The parameters are not written
//! into the container, so encrypting and decrypting deployments must agree
//! on them; a mismatch derives a different key and decryption fails
//! authentication.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys::{DerivedKey, KEY_LENGTH, SALT_LENGTH};
use enkrypt_common::{Error, Result};

/// Key-derivation function and its work factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum KdfParams {
    /// scrypt with cost `N = 2^log_n`, block size `r` and parallelism `p`.
    Scrypt {
        /// Base-2 logarithm of the CPU/memory cost.
        log_n: u8,
        /// Block size.
        r: u32,
        /// Parallelization.
        p: u32,
    },
    /// Argon2id.
    Argon2id {
        /// Memory cost in KiB (e.g., 65536 = 64 MiB).
        memory_cost: u32,
        /// Number of iterations.
        time_cost: u32,
        /// Degree of parallelism.
        parallelism: u32,
    },
}

impl KdfParams {
    /// scrypt with `N = 2^17, r = 8, p = 1`.
    ///
    /// This is the deployment default. It needs about 128 MiB and takes
    /// on the order of a second per derivation.
    pub fn reference() -> Self {
        Self::Scrypt {
            log_n: 17,
            r: 8,
            p: 1,
        }
    }

    /// Argon2id parameters suitable for interactive use.
    ///
    /// Targets approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self::Argon2id {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Argon2id parameters for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self::Argon2id {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Moderate Argon2id parameters for constrained devices.
    pub fn moderate() -> Self {
        Self::Argon2id {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a named preset.
    ///
    /// Accepts `reference`, `interactive`, `moderate` and `sensitive`.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "reference" => Ok(Self::reference()),
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF preset '{}'. Use: reference, interactive, moderate, or sensitive",
                other
            ))),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::reference()
    }
}

/// Derive a key from a password and salt.
///
/// # Preconditions
/// - `password` must not be empty
/// - `salt` must be exactly [`SALT_LENGTH`] bytes
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidInput` if the password is empty or the salt has the wrong length
/// - `Crypto` if the KDF rejects the parameters
///
/// # Security
/// - Password and key are never logged
/// - Intermediate key buffer is zeroized
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<DerivedKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if salt.len() != SALT_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Invalid salt length: expected {}, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }

    debug!(params = ?params, "Deriving key");

    let mut key_bytes = zeroize::Zeroizing::new([0u8; KEY_LENGTH]);
    match *params {
        KdfParams::Scrypt { log_n, r, p } => {
            let scrypt_params = scrypt::Params::new(log_n, r, p, KEY_LENGTH)
                .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;
            scrypt::scrypt(password, salt, &scrypt_params, &mut key_bytes[..])
                .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        }
        KdfParams::Argon2id {
            memory_cost,
            time_cost,
            parallelism,
        } => {
            let argon2_params = Params::new(memory_cost, time_cost, parallelism, Some(KEY_LENGTH))
                .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
            argon2
                .hash_password_into(password, salt, &mut key_bytes[..])
                .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        }
    }

    Ok(DerivedKey::from_bytes(*key_bytes))
}
