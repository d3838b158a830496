//! Foundation types for the content-addressable store (CAF).
//!
//! Every other CAF crate depends on `caf-types`.
//!
//! # Key Types
//!
//! - [`Digest`] -- 40-character lowercase hex content fingerprint, the sole
//!   storage key of the object database

pub mod digest;
pub mod error;

pub use digest::{Digest, DIGEST_BYTES, DIGEST_HEX_LEN, SHARD_LEN};
pub use error::TypeError;
