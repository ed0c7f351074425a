//! Common types used throughout Enkrypt.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Key of a blob within a store.
///
/// Keys are `/`-separated like object-store keys. They are independent of the
/// backend: a local store maps segments to directories, a memory store uses
/// the joined string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey {
    segments: Vec<String>,
}

impl BlobKey {
    /// Parse a key string.
    ///
    /// Leading and trailing separators are ignored.
    ///
    /// # Errors
    /// - Returns error if the key is empty
    /// - Returns error if any segment is empty, `.` or `..`, or contains `\`
    pub fn parse(key: &str) -> crate::Result<Self> {
        let trimmed = key.trim_matches('/');
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Blob key cannot be empty".to_string(),
            ));
        }

        let segments: Vec<String> = trimmed.split('/').map(String::from).collect();
        Self::from_segments(segments)
    }

    /// Create a key from its segments.
    pub fn from_segments(segments: Vec<String>) -> crate::Result<Self> {
        if segments.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Blob key cannot be empty".to_string(),
            ));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    /// Append a child segment.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_segment(child)?;
        let mut segments = self.segments.clone();
        segments.push(child.to_string());
        Ok(Self { segments })
    }

    /// Last segment of the key.
    pub fn name(&self) -> &str {
        // from_segments guarantees at least one segment
        self.segments.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Key segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the joined key string starts with `prefix`.
    ///
    /// This is a plain string prefix test, like object-store listings.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

fn validate_segment(segment: &str) -> crate::Result<()> {
    if segment.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Key segment cannot be empty".to_string(),
        ));
    }
    if segment == "." || segment == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "Key segment '{}' is not allowed",
            segment
        )));
    }
    if segment.contains('/') || segment.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Key segment cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<String> for BlobKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.to_string()
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SensitiveBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
