//! Blob storage for Enkrypt.
//!
//! This module provides a trait-based interface over opaque blob stores
//! (in-memory, local filesystem), a registry for resolving stores by name,
//! and [`SealedStore`], which keeps only encrypted containers at rest.
//!
//! # Design Principles
//! - Store isolation: No codec logic in the backends
//! - Async operations: All I/O operations are async
//! - Unified error semantics: Consistent error types across stores

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod sealed;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{BlobMetadata, BlobStore};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use sealed::SealedStore;
