//! Streaming encryption and decryption of containers.
//!
//! Data moves through fixed-size chunks so memory stays bounded regardless
//! of input size. The whole stream is covered by a single tag at the end of
//! the container; there is no per-chunk authentication.
//!
//! Both directions are explicit step-by-step state machines
//! ([`Encryptor`], [`Decryptor`]) with one-call wrappers
//! ([`Encryptor::encrypt`], [`Decryptor::decrypt`]) and byte/file helpers.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::{CodecConfig, ReleasePolicy};
use crate::container::{self, ChunkPlan, Header, OVERHEAD};
use crate::gcm::{OpeningState, SealingState, TAG_LENGTH};
use crate::keys::{Credentials, Nonce, Salt};
use enkrypt_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncryptPhase {
    Init,
    HeaderWritten,
    BodyStreaming,
}

/// Encrypting side of the codec.
///
/// Steps run in order: [`write_header`](Self::write_header), then
/// [`write_body`](Self::write_body) one or more times, then
/// [`finalize`](Self::finalize), which consumes the encryptor.
pub struct Encryptor {
    header: Header,
    state: SealingState,
    chunk_size: usize,
    phase: EncryptPhase,
}

impl Encryptor {
    /// Prepare a new container with a fresh salt and nonce.
    ///
    /// Runs the key derivation.
    ///
    /// # Errors
    /// - `InvalidInput` if the password is empty or the config is invalid
    /// - `Crypto` if the KDF rejects its parameters
    pub fn initialize(password: &[u8], config: &CodecConfig) -> Result<Self> {
        Self::with_parts(&Credentials::fresh(password), Nonce::generate(), config)
    }

    /// Prepare a container with caller-chosen salt and nonce.
    ///
    /// # Warning
    /// Reusing a nonce with the same password and salt exposes the XOR of
    /// the two plaintexts and allows tag forgery. Use
    /// [`Encryptor::initialize`] unless reproducible output is required.
    pub fn with_parts(credentials: &Credentials, nonce: Nonce, config: &CodecConfig) -> Result<Self> {
        config.validate()?;
        let key = credentials.derive(&config.kdf)?;
        let state = SealingState::new(&key, &nonce);

        Ok(Self {
            header: Header {
                salt: credentials.salt().clone(),
                nonce,
            },
            state,
            chunk_size: config.chunk_size,
            phase: EncryptPhase::Init,
        })
    }

    /// Header that will be (or was) written.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Write salt and nonce (48 bytes).
    ///
    /// # Errors
    /// - `NotPermitted` if the header was already written
    /// - `Io` on write failure
    pub fn write_header<W: Write>(&mut self, sink: W) -> Result<()> {
        if self.phase != EncryptPhase::Init {
            return Err(Error::NotPermitted("Header already written".to_string()));
        }
        self.header.write_to(sink)?;
        self.phase = EncryptPhase::HeaderWritten;
        Ok(())
    }

    /// Encrypt `source` until it is exhausted, writing ciphertext as it goes.
    ///
    /// Returns the number of bytes consumed by this call.
    ///
    /// # Errors
    /// - `NotPermitted` if the header has not been written
    /// - `Io` on read or write failure
    /// - `InvalidInput` if the total exceeds the AES-GCM message limit
    pub fn write_body<R: Read, W: Write>(&mut self, mut source: R, mut sink: W) -> Result<u64> {
        if self.phase == EncryptPhase::Init {
            return Err(Error::NotPermitted(
                "Header must be written before the body".to_string(),
            ));
        }
        self.phase = EncryptPhase::BodyStreaming;

        let mut buffer = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total = 0u64;
        loop {
            let n = fill_chunk(&mut source, &mut buffer)?;
            if n == 0 {
                break;
            }
            let chunk = &mut buffer[..n];
            self.state.seal_chunk(chunk)?;
            sink.write_all(chunk)?;
            total += n as u64;
        }

        Ok(total)
    }

    /// Write the tag and finish the container.
    ///
    /// # Errors
    /// - `NotPermitted` if the header has not been written
    /// - `Io` on write failure
    pub fn finalize<W: Write>(self, mut sink: W) -> Result<[u8; TAG_LENGTH]> {
        if self.phase == EncryptPhase::Init {
            return Err(Error::NotPermitted(
                "Header must be written before finalizing".to_string(),
            ));
        }
        let plaintext_len = self.state.processed();
        let tag = self.state.finalize();
        sink.write_all(&tag)?;

        debug!(plaintext_len, container_len = plaintext_len + OVERHEAD as u64, "Container sealed");
        Ok(tag)
    }

    /// Run header, body and tag in one go and hand the sink back.
    ///
    /// The sink receives exactly `48 + plaintext length + 16` bytes and is
    /// flushed. On error the sink holds a partial container and must be
    /// discarded.
    pub fn encrypt<R: Read, W: Write>(mut self, source: R, mut sink: W) -> Result<W> {
        self.write_header(&mut sink)?;
        self.write_body(source, &mut sink)?;
        self.finalize(&mut sink)?;
        sink.flush()?;
        Ok(sink)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecryptPhase {
    HeaderRead,
    BodyStreaming,
    BodyDone,
}

/// Decrypting side of the codec.
///
/// Created by [`Decryptor::read_header`]; then [`read_body`](Self::read_body)
/// and [`verify`](Self::verify), which consumes the decryptor.
pub struct Decryptor {
    header: Header,
    state: OpeningState,
    chunk_size: usize,
    ciphertext_len: u64,
    phase: DecryptPhase,
}

impl Decryptor {
    /// Read the header and set up the opening state.
    ///
    /// `container_len` is the total container size; the ciphertext length is
    /// derived from it because the container carries no length field.
    ///
    /// # Errors
    /// - `InvalidInput` if `container_len` is below 64 or the password is empty
    /// - `Io` if the header cannot be read
    pub fn read_header<R: Read>(
        password: &[u8],
        config: &CodecConfig,
        mut source: R,
        container_len: u64,
    ) -> Result<Self> {
        config.validate()?;
        let ciphertext_len = container::ciphertext_len(container_len)?;
        let header = Header::read_from(&mut source)?;

        let credentials = Credentials::with_salt(password, header.salt.clone());
        let key = credentials.derive(&config.kdf)?;
        let state = OpeningState::new(&key, &header.nonce);

        Ok(Self {
            header,
            state,
            chunk_size: config.chunk_size,
            ciphertext_len,
            phase: DecryptPhase::HeaderRead,
        })
    }

    /// Header recovered from the container.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Salt recovered from the container.
    pub fn salt(&self) -> &Salt {
        &self.header.salt
    }

    /// Number of ciphertext bytes between header and tag.
    pub fn ciphertext_len(&self) -> u64 {
        self.ciphertext_len
    }

    /// Decrypt the ciphertext body and write plaintext as it is produced.
    ///
    /// Nothing written here is authenticated until [`verify`](Self::verify)
    /// returns `Ok`.
    ///
    /// # Errors
    /// - `NotPermitted` if the body was already read
    /// - `Io` on a short read or write failure
    pub fn read_body<R: Read, W: Write>(&mut self, mut source: R, mut sink: W) -> Result<u64> {
        if self.phase != DecryptPhase::HeaderRead {
            return Err(Error::NotPermitted("Body already read".to_string()));
        }
        self.phase = DecryptPhase::BodyStreaming;

        let buffer_len = self.ciphertext_len.min(self.chunk_size as u64) as usize;
        let mut buffer = Zeroizing::new(vec![0u8; buffer_len]);

        // the trailing remainder chunk may be empty and is still processed
        for chunk_len in ChunkPlan::new(self.ciphertext_len, self.chunk_size)? {
            let chunk = &mut buffer[..chunk_len];
            source.read_exact(chunk)?;
            self.state.open_chunk(chunk)?;
            sink.write_all(chunk)?;
        }

        self.phase = DecryptPhase::BodyDone;
        Ok(self.ciphertext_len)
    }

    /// Read the trailing tag and check it.
    ///
    /// # Errors
    /// - `Authentication` on tag mismatch; any plaintext already written is
    ///   untrusted
    /// - `NotPermitted` if the body has not been read completely
    /// - `Io` if the tag cannot be read
    pub fn verify<R: Read>(self, mut source: R) -> Result<()> {
        if self.phase != DecryptPhase::BodyDone {
            return Err(Error::NotPermitted(
                "Body must be read before verification".to_string(),
            ));
        }
        let mut tag = [0u8; TAG_LENGTH];
        source.read_exact(&mut tag)?;

        let ciphertext_len = self.ciphertext_len;
        match self.state.verify(&tag) {
            Ok(()) => {
                debug!(ciphertext_len, "Container verified");
                Ok(())
            }
            Err(e) => {
                warn!(ciphertext_len, "Container rejected");
                Err(e)
            }
        }
    }

    /// Read, decrypt and verify a whole container and hand the sink back.
    ///
    /// With [`ReleasePolicy::VerifyFirst`] the sink is written only after the
    /// tag verifies, so the plaintext is held in memory until then. With
    /// [`ReleasePolicy::Streaming`] plaintext reaches the sink before
    /// verification and must be discarded on error. [`decrypt_to_path`]
    /// gives verify-first semantics for files without the memory cost.
    pub fn decrypt<R: Read, W: Write>(
        password: &[u8],
        config: &CodecConfig,
        source: R,
        container_len: u64,
        mut sink: W,
    ) -> Result<W> {
        match config.release {
            ReleasePolicy::Streaming => {
                stream_through(password, config, source, container_len, sink)
            }
            ReleasePolicy::VerifyFirst => {
                // grows with the data actually read, never with the declared length
                let mut held = Zeroizing::new(Vec::<u8>::new());
                stream_through(password, config, source, container_len, &mut *held)?;
                sink.write_all(&held)?;
                sink.flush()?;
                Ok(sink)
            }
        }
    }
}

/// Decrypt into `sink` as the body is read, then verify the tag.
fn stream_through<R: Read, W: Write>(
    password: &[u8],
    config: &CodecConfig,
    mut source: R,
    container_len: u64,
    mut sink: W,
) -> Result<W> {
    let mut decryptor = Decryptor::read_header(password, config, &mut source, container_len)?;
    decryptor.read_body(&mut source, &mut sink)?;
    decryptor.verify(&mut source)?;
    sink.flush()?;
    Ok(sink)
}

/// Read until `buf` is full or the source is exhausted.
fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Encrypt a byte slice into a new container.
pub fn encrypt_bytes(password: &[u8], plaintext: &[u8], config: &CodecConfig) -> Result<Vec<u8>> {
    let sink = Vec::with_capacity(plaintext.len() + OVERHEAD);
    Encryptor::initialize(password, config)?.encrypt(plaintext, sink)
}

/// Decrypt a complete container held in memory.
pub fn decrypt_bytes(password: &[u8], container: &[u8], config: &CodecConfig) -> Result<Vec<u8>> {
    let sink = Vec::with_capacity(container.len().saturating_sub(OVERHEAD));
    Decryptor::decrypt(password, config, container, container.len() as u64, sink)
}

/// Encrypt the file at `input` into a container at `output`.
///
/// Returns the container length. On failure the partially written output
/// is removed.
pub fn encrypt_file(
    password: &[u8],
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &CodecConfig,
) -> Result<u64> {
    let source = BufReader::new(File::open(input.as_ref())?);
    let output = output.as_ref();
    let sink = BufWriter::new(File::create(output)?);

    let result = Encryptor::initialize(password, config)
        .and_then(|encryptor| encryptor.encrypt(source, sink))
        .and_then(finish_file);

    if result.is_err() {
        discard_partial(output);
    }
    result
}

/// Decrypt the container at `input` into `output`.
///
/// The container length is taken from the file metadata. Returns the
/// plaintext length. See [`decrypt_to_path`] for what happens to `output`
/// on failure.
pub fn decrypt_file(
    password: &[u8],
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &CodecConfig,
) -> Result<u64> {
    let file = File::open(input.as_ref())?;
    let container_len = file.metadata()?.len();
    decrypt_to_path(password, config, BufReader::new(file), container_len, output)
}

/// Decrypt a container read from `source` into the file at `output`.
///
/// Memory use is bounded by the chunk size under either release policy.
/// With [`ReleasePolicy::VerifyFirst`] the plaintext is staged in a hidden
/// temporary file next to `output` and renamed into place only after the
/// tag verifies; on failure the staging file is removed and an existing
/// `output` is left untouched. With [`ReleasePolicy::Streaming`] `output`
/// is written directly and removed on failure.
///
/// Returns the plaintext length.
pub fn decrypt_to_path<R: Read>(
    password: &[u8],
    config: &CodecConfig,
    source: R,
    container_len: u64,
    output: impl AsRef<Path>,
) -> Result<u64> {
    let output = output.as_ref();

    match config.release {
        ReleasePolicy::Streaming => {
            let sink = BufWriter::new(File::create(output)?);
            let result = stream_through(password, config, source, container_len, sink)
                .and_then(finish_file);
            if result.is_err() {
                discard_partial(output);
            }
            result
        }
        ReleasePolicy::VerifyFirst => {
            let dir = match output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            // dropped, and so deleted, on every early return
            let staged = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(dir)?;

            let sink = stream_through(
                password,
                config,
                source,
                container_len,
                BufWriter::new(staged.as_file()),
            )?;
            sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            staged.as_file().sync_all()?;
            let len = staged.as_file().metadata()?.len();

            staged.persist(output).map_err(|e| Error::Io(e.error))?;
            debug!(path = %output.display(), len, "Verified plaintext written");
            Ok(len)
        }
    }
}

/// Prefix of the hidden files plaintext is staged in before verification.
const STAGING_PREFIX: &str = ".enkrypt-staging-";

fn finish_file(sink: BufWriter<File>) -> Result<u64> {
    let file = sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove partial output");
    }
}
