//! Digest engine for the content-addressable store.
//!
//! Computes the 160-bit SHA-1 fingerprint that keys every stored object,
//! over in-memory bytes, arbitrary readers, or files streamed in fixed-size
//! chunks. All hashing wraps the RustCrypto `sha1` crate; there is no custom
//! cryptography.

pub mod error;
pub mod hasher;

pub use error::DigestError;
pub use hasher::{DigestEngine, DigestWriter, CHUNK_SIZE};
