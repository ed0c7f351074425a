//! Common utilities and types shared across Enkrypt crates.
//!
//! This module provides the error type every crate returns and the small
//! value types passed between the codec, the stores and the CLI.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BlobKey, SensitiveBytes};
