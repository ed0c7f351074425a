//! Incremental AES-256-GCM.
//!
//! The one-shot AEAD APIs need the whole message in memory. Containers are
//! streamed, so this module keeps the CTR keystream position and the GHASH
//! accumulator across calls and produces a single tag at the end. Splitting
//! the input differently never changes the output bytes.
//!
//! Nonces are 16 bytes, so the pre-counter block is
//! `J0 = GHASH(nonce || 0^64 || [128]_64)` as in SP 800-38D. There is no
//! associated data.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::keys::{DerivedKey, Nonce, NONCE_LENGTH};
use enkrypt_common::{Error, Result};

/// Authentication tag size (16 bytes).
pub const TAG_LENGTH: usize = 16;

/// Largest message GCM can protect under one nonce: 2^36 - 32 bytes.
pub const MAX_MESSAGE_LENGTH: u64 = (1 << 36) - 32;

const BLOCK_LENGTH: usize = 16;

/// Counter-mode keystream with the 32-bit wrapping increment GCM uses.
struct Keystream {
    cipher: Aes256,
    counter: [u8; BLOCK_LENGTH],
    block: [u8; BLOCK_LENGTH],
    used: usize,
}

impl Keystream {
    fn new(cipher: Aes256, counter: [u8; BLOCK_LENGTH]) -> Self {
        Self {
            cipher,
            counter,
            block: [0u8; BLOCK_LENGTH],
            used: BLOCK_LENGTH,
        }
    }

    fn refill(&mut self) {
        let mut block = GenericArray::clone_from_slice(&self.counter);
        self.cipher.encrypt_block(&mut block);
        self.block.copy_from_slice(&block);
        self.used = 0;
        inc32(&mut self.counter);
    }

    fn apply(&mut self, data: &mut [u8]) {
        let mut offset = 0;
        while offset < data.len() {
            if self.used == BLOCK_LENGTH {
                self.refill();
            }
            let take = (BLOCK_LENGTH - self.used).min(data.len() - offset);
            let keystream = &self.block[self.used..self.used + take];
            for (byte, k) in data[offset..offset + take].iter_mut().zip(keystream) {
                *byte ^= k;
            }
            self.used += take;
            offset += take;
        }
    }
}

impl Drop for Keystream {
    fn drop(&mut self) {
        self.block.zeroize();
        self.counter.zeroize();
    }
}

fn inc32(counter: &mut [u8; BLOCK_LENGTH]) {
    let mut low = [0u8; 4];
    low.copy_from_slice(&counter[12..]);
    let next = u32::from_be_bytes(low).wrapping_add(1);
    counter[12..].copy_from_slice(&next.to_be_bytes());
}

/// State shared by both directions: keystream, GHASH over the ciphertext
/// and the buffered tail of an incomplete GHASH block.
struct GcmCore {
    keystream: Keystream,
    ghash: GHash,
    tag_mask: [u8; TAG_LENGTH],
    pending: [u8; BLOCK_LENGTH],
    pending_len: usize,
    processed: u64,
}

impl GcmCore {
    fn new(key: &DerivedKey, nonce: &Nonce) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));

        let mut hash_key = ghash::Block::default();
        cipher.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);
        hash_key.as_mut_slice().zeroize();

        let mut j0_hash = ghash.clone();
        j0_hash.update_padded(nonce.as_bytes());
        let mut len_block = ghash::Block::default();
        len_block[8..].copy_from_slice(&((NONCE_LENGTH as u64) * 8).to_be_bytes());
        j0_hash.update(&[len_block]);
        let j0 = j0_hash.finalize();

        let mut tag_mask_block = j0;
        cipher.encrypt_block(&mut tag_mask_block);
        let mut tag_mask = [0u8; TAG_LENGTH];
        tag_mask.copy_from_slice(&tag_mask_block);

        let mut counter = [0u8; BLOCK_LENGTH];
        counter.copy_from_slice(&j0);
        inc32(&mut counter);

        Self {
            keystream: Keystream::new(cipher, counter),
            ghash,
            tag_mask,
            pending: [0u8; BLOCK_LENGTH],
            pending_len: 0,
            processed: 0,
        }
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        let total = self.processed.saturating_add(len as u64);
        if total > MAX_MESSAGE_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Message exceeds the AES-GCM limit of {} bytes",
                MAX_MESSAGE_LENGTH
            )));
        }
        self.processed = total;
        Ok(())
    }

    /// Feed ciphertext into GHASH, carrying incomplete blocks over.
    fn absorb(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (BLOCK_LENGTH - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK_LENGTH {
                return;
            }
            let block = ghash::Block::clone_from_slice(&self.pending);
            self.ghash.update(&[block]);
            self.pending_len = 0;
        }

        let whole = data.len() - data.len() % BLOCK_LENGTH;
        // whole blocks only, so no padding is added here
        self.ghash.update_padded(&data[..whole]);

        let rest = &data[whole..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn tag(mut self) -> [u8; TAG_LENGTH] {
        if self.pending_len > 0 {
            let pending_len = self.pending_len;
            self.ghash.update_padded(&self.pending[..pending_len]);
        }

        // len(A) = 0 in the upper half, len(C) in bits in the lower half
        let mut len_block = ghash::Block::default();
        len_block[8..].copy_from_slice(&(self.processed * 8).to_be_bytes());
        self.ghash.update(&[len_block]);

        let digest = self.ghash.clone().finalize();
        let mut tag = [0u8; TAG_LENGTH];
        for ((out, d), m) in tag.iter_mut().zip(digest.iter()).zip(self.tag_mask.iter()) {
            *out = d ^ m;
        }
        tag
    }
}

impl Drop for GcmCore {
    fn drop(&mut self) {
        self.pending.zeroize();
        self.tag_mask.zeroize();
    }
}

/// Encrypting direction of the running AEAD state.
///
/// Consumed by [`SealingState::finalize`]; a new state is needed for every
/// container.
pub struct SealingState {
    core: GcmCore,
}

impl SealingState {
    /// Start a new message under `key` and `nonce`.
    pub fn new(key: &DerivedKey, nonce: &Nonce) -> Self {
        Self {
            core: GcmCore::new(key, nonce),
        }
    }

    /// Encrypt `chunk` in place and fold the ciphertext into the tag.
    ///
    /// # Errors
    /// - `InvalidInput` if the total message would exceed [`MAX_MESSAGE_LENGTH`]
    pub fn seal_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        self.core.reserve(chunk.len())?;
        self.core.keystream.apply(chunk);
        self.core.absorb(chunk);
        Ok(())
    }

    /// Bytes encrypted so far.
    pub fn processed(&self) -> u64 {
        self.core.processed
    }

    /// Finish the message and return its tag.
    pub fn finalize(self) -> [u8; TAG_LENGTH] {
        self.core.tag()
    }
}

/// Decrypting direction of the running AEAD state.
///
/// Consumed by [`OpeningState::verify`].
pub struct OpeningState {
    core: GcmCore,
}

impl OpeningState {
    /// Start opening a message under `key` and `nonce`.
    pub fn new(key: &DerivedKey, nonce: &Nonce) -> Self {
        Self {
            core: GcmCore::new(key, nonce),
        }
    }

    /// Fold `chunk` into the tag and decrypt it in place.
    ///
    /// The plaintext is not authenticated until [`OpeningState::verify`]
    /// succeeds.
    pub fn open_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        self.core.reserve(chunk.len())?;
        self.core.absorb(chunk);
        self.core.keystream.apply(chunk);
        Ok(())
    }

    /// Bytes decrypted so far.
    pub fn processed(&self) -> u64 {
        self.core.processed
    }

    /// Check `expected` against the tag over everything opened so far.
    ///
    /// # Errors
    /// - `Authentication` if the tags differ (compared in constant time)
    pub fn verify(self, expected: &[u8; TAG_LENGTH]) -> Result<()> {
        let computed = self.core.tag();
        if bool::from(computed.ct_eq(expected)) {
            Ok(())
        } else {
            Err(Error::Authentication(
                "Tag mismatch: container was modified or the password is wrong".to_string(),
            ))
        }
    }
}
