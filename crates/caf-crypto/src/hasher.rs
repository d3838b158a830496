use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use caf_types::Digest;
use sha1::{Digest as _, Sha1};

use crate::error::DigestError;

/// Buffer size used when streaming input through the hash accumulator.
pub const CHUNK_SIZE: usize = 4096;

/// Stateless SHA-1 digest engine.
///
/// Every digest in the store comes from here. The same bytes always yield
/// the same 40-character lowercase hex [`Digest`], on every platform.
pub struct DigestEngine;

impl DigestEngine {
    /// Digest an in-memory byte sequence.
    ///
    /// The SHA-1 engine has no initialisation failure path, so this is
    /// infallible.
    pub fn digest_of_bytes(data: &[u8]) -> Digest {
        Digest::from_raw(Sha1::digest(data).into())
    }

    /// Digest everything a reader yields, in [`CHUNK_SIZE`] chunks.
    pub fn digest_of_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
        let mut hasher = Sha1::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(Digest::from_raw(hasher.finalize().into()))
    }

    /// Digest a file's bytes without loading it into memory.
    ///
    /// Fails if the file cannot be opened or a read fails mid-stream.
    pub fn digest_of_file(path: &Path) -> Result<Digest, DigestError> {
        let wrap = |source| DigestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(wrap)?;
        Self::digest_of_reader(file).map_err(wrap)
    }
}

/// `Write` adapter that hashes every byte forwarded to the inner writer.
///
/// Only bytes the inner writer actually accepted are hashed, so the final
/// digest always describes what reached the destination.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    /// Total bytes forwarded so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Finish hashing and hand back the inner writer with the digest of
    /// everything written through it.
    pub fn finish(self) -> (W, Digest) {
        (self.inner, Digest::from_raw(self.hasher.finalize().into()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
