//! Container byte layout.
//!
//! ```text
//! offset 0      salt        32 bytes
//! offset 32     nonce       16 bytes
//! offset 48     ciphertext  N bytes (N = plaintext length)
//! offset 48+N   tag         16 bytes
//! ```
//!
//! Nothing else is stored: no version, no length prefix, no KDF parameters.

use std::io::{Read, Write};

use crate::gcm::{MAX_MESSAGE_LENGTH, TAG_LENGTH};
use crate::keys::{Nonce, Salt, NONCE_LENGTH, SALT_LENGTH};
use enkrypt_common::{Error, Result};

/// Header size: salt (32) + nonce (16).
pub const HEADER_LENGTH: usize = SALT_LENGTH + NONCE_LENGTH;

/// Bytes a container adds on top of the plaintext.
pub const OVERHEAD: usize = HEADER_LENGTH + TAG_LENGTH;

/// Container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Key-derivation salt.
    pub salt: Salt,
    /// AEAD nonce.
    pub nonce: Nonce,
}

impl Header {
    /// Write salt then nonce.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(self.salt.as_bytes())?;
        writer.write_all(self.nonce.as_bytes())?;
        Ok(())
    }

    /// Read salt then nonce.
    ///
    /// # Errors
    /// - `Io` (`UnexpectedEof`) if fewer than [`HEADER_LENGTH`] bytes remain
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut salt = [0u8; SALT_LENGTH];
        reader.read_exact(&mut salt)?;
        let mut nonce = [0u8; NONCE_LENGTH];
        reader.read_exact(&mut nonce)?;
        Ok(Self {
            salt: Salt::from_bytes(salt),
            nonce: Nonce::from_bytes(nonce),
        })
    }
}

/// Container length for a plaintext of `plaintext_len` bytes.
pub fn container_len(plaintext_len: u64) -> u64 {
    plaintext_len + OVERHEAD as u64
}

/// Ciphertext length inside a container of `container_len` bytes.
///
/// # Errors
/// - `InvalidInput` if the container cannot even hold a header and tag, or
///   if the ciphertext would exceed the AES-GCM message limit
pub fn ciphertext_len(container_len: u64) -> Result<u64> {
    let len = container_len.checked_sub(OVERHEAD as u64).ok_or_else(|| {
        Error::InvalidInput(format!(
            "Container too short: {} bytes, need at least {}",
            container_len, OVERHEAD
        ))
    })?;
    if len > MAX_MESSAGE_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Container too long: {} ciphertext bytes, limit is {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(len)
}

/// Chunk sizes for reading `total` bytes: `total / chunk` full chunks, then
/// the remainder.
///
/// The remainder is always yielded, even when it is zero, so `total = 0`
/// yields a single empty chunk.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunk_size: u64,
    full_chunks: u64,
    remainder: u64,
    emitted: u64,
}

impl ChunkPlan {
    /// Plan `total` bytes in `chunk_size` pieces.
    ///
    /// # Errors
    /// - `InvalidInput` if `chunk_size` is zero
    pub fn new(total: u64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("Chunk size must be positive".to_string()));
        }
        let chunk_size = chunk_size as u64;
        Ok(Self {
            chunk_size,
            full_chunks: total / chunk_size,
            remainder: total % chunk_size,
            emitted: 0,
        })
    }
}

impl Iterator for ChunkPlan {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let item = if self.emitted < self.full_chunks {
            self.chunk_size
        } else if self.emitted == self.full_chunks {
            self.remainder
        } else {
            return None;
        };
        self.emitted += 1;
        Some(item as usize)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.full_chunks + 1).saturating_sub(self.emitted) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkPlan {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_layout_constants() {
        assert_eq!(HEADER_LENGTH, 48);
        assert_eq!(OVERHEAD, 64);
        assert_eq!(container_len(11), 75);
        assert_eq!(container_len(0), 64);
    }

    #[test]
    fn test_ciphertext_len() {
        assert_eq!(ciphertext_len(75).unwrap(), 11);
        assert_eq!(ciphertext_len(64).unwrap(), 0);
        assert!(matches!(ciphertext_len(63), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_ciphertext_len_upper_bound() {
        let largest = MAX_MESSAGE_LENGTH + OVERHEAD as u64;
        assert_eq!(ciphertext_len(largest).unwrap(), MAX_MESSAGE_LENGTH);
        assert!(matches!(ciphertext_len(largest + 1), Err(Error::InvalidInput(_))));
        assert!(matches!(ciphertext_len(1u64 << 44), Err(Error::InvalidInput(_))));
        assert!(matches!(ciphertext_len(u64::MAX), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_header_roundtrip_order() {
        let header = Header {
            salt: Salt::from_bytes([1u8; SALT_LENGTH]),
            nonce: Nonce::from_bytes([2u8; NONCE_LENGTH]),
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_LENGTH);
        assert_eq!(&buf[..SALT_LENGTH], &[1u8; SALT_LENGTH]);
        assert_eq!(&buf[SALT_LENGTH..], &[2u8; NONCE_LENGTH]);
        assert_eq!(Header::read_from(Cursor::new(&buf)).unwrap(), header);
    }

    #[test]
    fn test_header_short_read() {
        let result = Header::read_from(Cursor::new(vec![0u8; HEADER_LENGTH - 1]));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_chunk_plan_with_remainder() {
        let plan: Vec<usize> = ChunkPlan::new(10, 4).unwrap().collect();
        assert_eq!(plan, vec![4, 4, 2]);
    }

    #[test]
    fn test_chunk_plan_exact_multiple_ends_with_empty() {
        let plan: Vec<usize> = ChunkPlan::new(8, 4).unwrap().collect();
        assert_eq!(plan, vec![4, 4, 0]);
    }

    #[test]
    fn test_chunk_plan_empty_total() {
        let plan = ChunkPlan::new(0, 1024).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_chunk_plan_zero_chunk_size() {
        assert!(ChunkPlan::new(10, 0).is_err());
    }
}
