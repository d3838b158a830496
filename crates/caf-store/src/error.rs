use std::time::Duration;

use caf_crypto::DigestError;
use caf_types::{Digest, TypeError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An empty or malformed root or digest was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The digest has no stored content.
    #[error("object not found: {0}")]
    NotFound(Digest),

    /// A shared or exclusive lock was not obtained within the wait bound.
    #[error("timed out after {waited:?} waiting for lock on {digest}")]
    LockTimeout { digest: Digest, waited: Duration },

    /// A non-blocking lock check found the object in use.
    #[error("object is in use: {0}")]
    Busy(Digest),

    /// A decoded length, tag, or field is out of its valid range.
    #[error("corrupt object {digest}: {reason}")]
    CorruptData { digest: Digest, reason: String },

    /// Bytes written under a digest do not hash to that digest.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: Digest, computed: Digest },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<DigestError> for StoreError {
    fn from(err: DigestError) -> Self {
        Self::Io(err.into_io())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
