//! Content-addressable object storage for CAF.
//!
//! A git-style object database: content is keyed by the SHA-1 digest of its
//! bytes and stored at `<root>/<first 2 hex chars>/<digest>`. Trees and
//! commits are hashed from their fields and persisted in a compact
//! length-prefixed binary format.
//!
//! # Components
//!
//! - [`ContentStore`] -- sharded layout plus lock-guarded open, save, read
//!   and delete of raw content
//! - [`Blob`], [`Tree`], [`TreeRecord`], [`Commit`] -- immutable object
//!   values, hashed through [`ContentAddressed`]
//! - [`codec`] -- `save_*` / `load_*` for trees and commits
//! - [`Repository`] -- a repository directory wrapping an object store
//!
//! # Design Rules
//!
//! 1. The store root is always explicit; there is no process-wide default.
//! 2. At most one writer holds an object; readers share. Every lock wait is
//!    bounded and ends in [`StoreError::LockTimeout`].
//! 3. Saves are staged beside the object and renamed into place. A failed
//!    write deletes its staging file before the error surfaces, so any file
//!    reachable by digest is a complete encoding.
//! 4. Saving an object that already exists is a no-op.
//! 5. Deleting an absent object succeeds.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod lock;
pub mod object;
pub mod repository;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use caf_crypto::DigestEngine;
pub use caf_types::Digest;
pub use codec::{load_commit, load_tree, save_commit, save_tree, MAX_FIELD_LEN};
pub use config::{LockPolicy, RetryPolicy, StoreConfig};
pub use content::ContentStore;
pub use error::{StoreError, StoreResult};
pub use lock::{LockMode, LockedFile};
pub use object::{Blob, Commit, RecordKind, Tree, TreeRecord};
pub use repository::Repository;
pub use traits::ContentAddressed;
