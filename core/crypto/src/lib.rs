//! Cryptographic core of Enkrypt.
//!
//! This module provides:
//! - Password-based key derivation (scrypt or Argon2id)
//! - Incremental AES-256-GCM with a single tag per stream
//! - The container layout: `salt | nonce | ciphertext | tag`
//! - Streaming encryption and decryption over `Read`/`Write`
//!
//! # Security Guarantees
//! - Key material and passwords are zeroized on drop
//! - No plaintext, password or key material is ever logged
//! - Tags are compared in constant time
//! - By default decrypted bytes are released only after the tag verifies

pub mod config;
pub mod container;
pub mod gcm;
pub mod kdf;
pub mod keys;
pub mod stream;

pub use config::{CodecConfig, ReleasePolicy, DEFAULT_CHUNK_SIZE};
pub use container::{Header, HEADER_LENGTH, OVERHEAD};
pub use gcm::TAG_LENGTH;
pub use kdf::{derive_key, KdfParams};
pub use keys::{Credentials, DerivedKey, Nonce, Salt, KEY_LENGTH, NONCE_LENGTH, SALT_LENGTH};
pub use stream::{
    decrypt_bytes, decrypt_file, decrypt_to_path, encrypt_bytes, encrypt_file, Decryptor, Encryptor,
};
