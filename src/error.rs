//! Error type shared across the crate.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Errors surfaced by tree operations and the bundled handle stores.
///
/// Ordinary misses are not errors: `get` on an absent key returns `None` and
/// `delete` on an absent key reports that nothing was removed. Only
/// structural corruption, misuse, or store failures land here.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// I/O failure from a disk-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Loaded content violates a structural invariant.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// A handle did not resolve to any stored content.
    #[error("handle not found in store")]
    HandleNotFound,
    /// Caller passed an argument outside the supported range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Operation is not defined for the tree's current representation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
