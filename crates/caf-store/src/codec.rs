//! Binary encoding of trees and commits.
//!
//! All integers are little-endian. Strings are a `u32` byte length followed
//! by that many UTF-8 bytes.
//!
//! ```text
//! commit: string tree, string author, string message, u64 timestamp,
//!         u8 has_parent, [string parent]
//! tree:   u32 count, count × (u8 kind, string child_digest, string name)
//! ```
//!
//! The parent of a commit carries an explicit presence byte (0 = root
//! commit, 1 = parent follows), so "no parent" is never confused with an
//! empty field.

use std::io::{self, BufReader, Read};

use caf_types::Digest;
use tracing::debug;

use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::object::{Commit, RecordKind, Tree, TreeRecord};
use crate::traits::ContentAddressed;

/// Longest string field accepted on decode; larger lengths signal corruption.
pub const MAX_FIELD_LEN: u32 = 1024 * 1024;

const PARENT_ABSENT: u8 = 0;
const PARENT_PRESENT: u8 = 1;

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Encode a commit into its on-disk bytes.
pub fn encode_commit(commit: &Commit) -> StoreResult<Vec<u8>> {
    let mut out = FieldWriter::default();
    out.put_str("tree", commit.tree().as_str())?;
    out.put_str("author", commit.author())?;
    out.put_str("message", commit.message())?;
    out.put_u64(commit.timestamp());
    match commit.parent() {
        Some(parent) => {
            out.put_u8(PARENT_PRESENT);
            out.put_str("parent", parent.as_str())?;
        }
        None => out.put_u8(PARENT_ABSENT),
    }
    Ok(out.into_inner())
}

/// Decode a commit stored under `digest` from `reader`.
pub fn decode_commit<R: Read>(digest: &Digest, reader: R) -> StoreResult<Commit> {
    let mut input = FieldReader::new(digest, reader);
    let tree = input.read_digest("tree")?;
    let author = input.read_string("author")?;
    let message = input.read_string("message")?;
    let timestamp = input.read_u64("timestamp")?;
    let parent = match input.read_u8("parent flag")? {
        PARENT_ABSENT => None,
        PARENT_PRESENT => Some(input.read_digest("parent")?),
        other => return Err(input.corrupt(format!("invalid parent flag {other}"))),
    };
    input.expect_end()?;
    Ok(Commit::new(tree, author, message, timestamp, parent))
}

/// Persist a commit under its derived digest and return that digest.
///
/// An already-stored commit is left untouched. A failed write leaves
/// nothing behind under the digest.
pub fn save_commit(store: &ContentStore, commit: &Commit) -> StoreResult<Digest> {
    let digest = commit.compute_digest();
    let bytes = encode_commit(commit)?;
    store.put_object(&digest, &bytes)?;
    debug!(digest = %digest.short_hex(), "saved commit");
    Ok(digest)
}

/// Load the commit stored under `digest`.
pub fn load_commit(store: &ContentStore, digest: &Digest) -> StoreResult<Commit> {
    let mut handle = store.open_for_read(digest)?;
    let commit = decode_commit(digest, BufReader::new(&mut handle))?;
    handle.release()?;
    verify_digest(digest, &commit)?;
    debug!(digest = %digest.short_hex(), "loaded commit");
    Ok(commit)
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Encode a tree into its on-disk bytes, records in name order.
pub fn encode_tree(tree: &Tree) -> StoreResult<Vec<u8>> {
    let mut out = FieldWriter::default();
    let count = u32::try_from(tree.len())
        .map_err(|_| StoreError::InvalidArgument(format!("too many records: {}", tree.len())))?;
    out.put_u32(count);
    for record in tree.records() {
        out.put_u8(record.kind().tag());
        out.put_str("child digest", record.digest().as_str())?;
        out.put_str("name", record.name())?;
    }
    Ok(out.into_inner())
}

/// Decode a tree stored under `digest` from `reader`.
///
/// Any failure part-way through aborts the whole decode; no partial tree
/// is returned.
pub fn decode_tree<R: Read>(digest: &Digest, reader: R) -> StoreResult<Tree> {
    let mut input = FieldReader::new(digest, reader);
    let count = input.read_u32("record count")?;
    let mut records = Vec::new();
    for _ in 0..count {
        let tag = input.read_u8("record kind")?;
        let kind = RecordKind::from_tag(tag)
            .ok_or_else(|| input.corrupt(format!("unknown record kind {tag}")))?;
        let child = input.read_digest("child digest")?;
        let name = input.read_string("name")?;
        records.push(TreeRecord::new(kind, child, name));
    }
    input.expect_end()?;
    Ok(Tree::new(records))
}

/// Persist a tree under its derived digest and return that digest.
pub fn save_tree(store: &ContentStore, tree: &Tree) -> StoreResult<Digest> {
    let digest = tree.compute_digest();
    let bytes = encode_tree(tree)?;
    store.put_object(&digest, &bytes)?;
    debug!(digest = %digest.short_hex(), records = tree.len(), "saved tree");
    Ok(digest)
}

/// Load the tree stored under `digest`.
pub fn load_tree(store: &ContentStore, digest: &Digest) -> StoreResult<Tree> {
    let mut handle = store.open_for_read(digest)?;
    let tree = decode_tree(digest, BufReader::new(&mut handle))?;
    handle.release()?;
    verify_digest(digest, &tree)?;
    debug!(digest = %digest.short_hex(), records = tree.len(), "loaded tree");
    Ok(tree)
}

// ---------------------------------------------------------------------------
// Field framing
// ---------------------------------------------------------------------------

fn verify_digest<T: ContentAddressed>(expected: &Digest, value: &T) -> StoreResult<()> {
    let computed = value.compute_digest();
    if computed != *expected {
        return Err(StoreError::HashMismatch {
            expected: expected.clone(),
            computed,
        });
    }
    Ok(())
}

#[derive(Default)]
struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Refuses fields the decoder would reject as corrupt.
    fn put_str(&mut self, field: &str, value: &str) -> StoreResult<()> {
        let len = u32::try_from(value.len())
            .ok()
            .filter(|len| *len <= MAX_FIELD_LEN)
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "{field} is {} bytes; limit is {MAX_FIELD_LEN}",
                    value.len()
                ))
            })?;
        self.put_u32(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct FieldReader<'a, R> {
    digest: &'a Digest,
    reader: R,
}

impl<'a, R: Read> FieldReader<'a, R> {
    fn new(digest: &'a Digest, reader: R) -> Self {
        Self { digest, reader }
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::CorruptData {
            digest: self.digest.clone(),
            reason: reason.into(),
        }
    }

    fn fill(&mut self, field: &str, buf: &mut [u8]) -> StoreResult<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.corrupt(format!("truncated {field}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_u8(&mut self, field: &str) -> StoreResult<u8> {
        let mut buf = [0u8; 1];
        self.fill(field, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self, field: &str) -> StoreResult<u32> {
        let mut buf = [0u8; 4];
        self.fill(field, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self, field: &str) -> StoreResult<u64> {
        let mut buf = [0u8; 8];
        self.fill(field, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self, field: &str) -> StoreResult<String> {
        let len = self.read_u32(field)?;
        if len > MAX_FIELD_LEN {
            return Err(self.corrupt(format!(
                "{field} length {len} exceeds limit {MAX_FIELD_LEN}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.fill(field, &mut buf)?;
        String::from_utf8(buf).map_err(|_| self.corrupt(format!("{field} is not valid UTF-8")))
    }

    fn read_digest(&mut self, field: &str) -> StoreResult<Digest> {
        let text = self.read_string(field)?;
        Digest::parse(&text).map_err(|e| self.corrupt(format!("{field}: {e}")))
    }

    fn expect_end(&mut self) -> StoreResult<()> {
        let mut probe = [0u8; 1];
        loop {
            match self.reader.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(self.corrupt("trailing bytes after object")),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
