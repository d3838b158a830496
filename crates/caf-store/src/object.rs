use std::collections::BTreeMap;

use caf_crypto::DigestEngine;
use caf_types::Digest;
use serde::{Deserialize, Serialize};

use crate::traits::ContentAddressed;

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw stored content, identified by the digest of its bytes.
///
/// A blob holds no payload in memory; its value is its digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob {
    digest: Digest,
}

impl Blob {
    pub fn new(digest: Digest) -> Self {
        Self { digest }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn into_digest(self) -> Digest {
        self.digest
    }
}

impl From<Digest> for Blob {
    fn from(digest: Digest) -> Self {
        Self::new(digest)
    }
}

impl ContentAddressed for Blob {
    fn compute_digest(&self) -> Digest {
        self.digest.clone()
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// The kind of object a tree record points at.
///
/// The discriminant is both the on-disk tag byte and the ordinal mixed into
/// tree hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    Tree = 0,
    Blob = 1,
    Commit = 2,
}

impl RecordKind {
    /// On-disk tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse an on-disk tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Tree),
            1 => Some(Self::Blob),
            2 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// One named entry of a tree. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeRecord {
    kind: RecordKind,
    digest: Digest,
    name: String,
}

impl TreeRecord {
    pub fn new(kind: RecordKind, digest: Digest, name: impl Into<String>) -> Self {
        Self {
            kind,
            digest,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Digest of the referenced object.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Directory listing: a name-ordered mapping from name to record.
///
/// Iteration is always in name order, whatever order records were added in,
/// so the tree's digest depends only on its contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    records: BTreeMap<String, TreeRecord>,
}

impl Tree {
    /// Build a tree from records. A later record replaces an earlier one
    /// with the same name.
    pub fn new(records: impl IntoIterator<Item = TreeRecord>) -> Self {
        records.into_iter().collect()
    }

    /// Create an empty tree.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<&TreeRecord> {
        self.records.get(name)
    }

    /// Records in name order.
    pub fn records(&self) -> impl Iterator<Item = &TreeRecord> {
        self.records.values()
    }

    /// The underlying name-to-record mapping.
    pub fn as_map(&self) -> &BTreeMap<String, TreeRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<TreeRecord> for Tree {
    fn from_iter<I: IntoIterator<Item = TreeRecord>>(iter: I) -> Self {
        let records = iter
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self { records }
    }
}

impl ContentAddressed for Tree {
    /// Digest of `name ‖ kind ordinal ‖ child digest` over all records in
    /// name order, with the ordinal rendered as decimal text.
    fn compute_digest(&self) -> Digest {
        let mut acc = String::new();
        for record in self.records.values() {
            acc.push_str(&record.name);
            acc.push_str(&record.kind.tag().to_string());
            acc.push_str(record.digest.as_str());
        }
        DigestEngine::digest_of_bytes(acc.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A snapshot of a tree with authorship metadata and an optional parent.
///
/// The parent link is part of the hashed fields, so rewriting any ancestor
/// changes every descendant's digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    tree: Digest,
    author: String,
    message: String,
    timestamp: u64,
    parent: Option<Digest>,
}

impl Commit {
    pub fn new(
        tree: Digest,
        author: impl Into<String>,
        message: impl Into<String>,
        timestamp: u64,
        parent: Option<Digest>,
    ) -> Self {
        Self {
            tree,
            author: author.into(),
            message: message.into(),
            timestamp,
            parent,
        }
    }

    /// Digest of the committed tree.
    pub fn tree(&self) -> &Digest {
        &self.tree
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Unix timestamp in seconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn parent(&self) -> Option<&Digest> {
        self.parent.as_ref()
    }

    /// Whether this commit starts a history (has no parent).
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl ContentAddressed for Commit {
    /// Digest of `tree ‖ author ‖ message ‖ timestamp ‖ parent-or-empty`,
    /// with the timestamp rendered as decimal text.
    fn compute_digest(&self) -> Digest {
        let mut acc = String::new();
        acc.push_str(self.tree.as_str());
        acc.push_str(&self.author);
        acc.push_str(&self.message);
        acc.push_str(&self.timestamp.to_string());
        if let Some(parent) = &self.parent {
            acc.push_str(parent.as_str());
        }
        DigestEngine::digest_of_bytes(acc.as_bytes())
    }
}
