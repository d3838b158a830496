use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use caf_crypto::{DigestEngine, DigestWriter};
use caf_types::Digest;
use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::lock::{self, LockMode, LockedFile};
use crate::object::Blob;

/// Sharded, lock-guarded content store rooted at an explicit directory.
///
/// Layout: `<root>/<first two hex chars>/<full digest>`, one file per
/// object. Shard directories are created lazily on write and removed when a
/// delete leaves them empty.
///
/// Every content file is touched through an advisory lock: writers hold an
/// exclusive lock, readers a shared one, and both wait at most
/// [`LockPolicy::timeout`](crate::LockPolicy::timeout). Saves are staged in
/// the shard and renamed into place, so anything reachable by digest is
/// complete.
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
    config: StoreConfig,
}

impl ContentStore {
    /// Open a store at `root` with the default configuration.
    ///
    /// Nothing is created on disk until the first write or
    /// [`ensure_root`](Self::ensure_root).
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_config(root, StoreConfig::default())
    }

    /// Open a store at `root` with an explicit configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StoreError::InvalidArgument("store root is empty".into()));
        }
        if config.chunk_size == 0 {
            return Err(StoreError::InvalidArgument("chunk size must be non-zero".into()));
        }
        Ok(Self { root, config })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create the root directory if absent. Idempotent.
    pub fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Shard directory for a digest, without touching the filesystem.
    pub fn shard_dir(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.shard())
    }

    /// Content path for a digest, without touching the filesystem.
    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        self.shard_dir(digest).join(digest.as_str())
    }

    /// Content path for a digest, creating its shard directory if absent.
    pub fn path_for(&self, digest: &Digest) -> StoreResult<PathBuf> {
        fs::create_dir_all(self.shard_dir(digest))?;
        Ok(self.object_path(digest))
    }

    /// Whether content is stored under `digest`.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.object_path(digest).is_file()
    }

    /// Open (creating if needed) the content file for `digest` under an
    /// exclusive lock.
    ///
    /// The file is truncated only once the lock is held, so a concurrent
    /// writer's bytes are never clobbered mid-write. If the file is unlinked
    /// while the lock is awaited, the path is reopened within the same wait
    /// budget.
    pub fn open_for_write(&self, digest: &Digest) -> StoreResult<LockedFile> {
        let started = Instant::now();
        loop {
            let path = self.path_for(digest)?;
            let file = match create_file(&path) {
                // A concurrent delete removed the shard between mkdir and open.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir_all(self.shard_dir(digest))?;
                    create_file(&path)?
                }
                other => other?,
            };
            let handle = LockedFile::acquire(
                file,
                path,
                digest.clone(),
                LockMode::Exclusive,
                &self.config.lock,
                started,
            )?;
            if handle.is_current()? {
                handle.file().set_len(0)?;
                return Ok(handle);
            }
            self.reopen_stale(digest, started)?;
        }
    }

    /// Open the content file for `digest` read-only under a shared lock.
    ///
    /// Fails with [`StoreError::NotFound`] if the object is deleted while
    /// the lock is awaited.
    pub fn open_for_read(&self, digest: &Digest) -> StoreResult<LockedFile> {
        self.lock_existing(digest, LockMode::Shared, Instant::now())
    }

    /// Lock the file currently linked under `digest` without creating it.
    fn lock_existing(
        &self,
        digest: &Digest,
        mode: LockMode,
        started: Instant,
    ) -> StoreResult<LockedFile> {
        let path = self.object_path(digest);
        loop {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(digest.clone()));
                }
                Err(e) => return Err(e.into()),
            };
            let handle = LockedFile::acquire(
                file,
                path.clone(),
                digest.clone(),
                mode,
                &self.config.lock,
                started,
            )?;
            if handle.is_current()? {
                return Ok(handle);
            }
            self.reopen_stale(digest, started)?;
        }
    }

    /// Fail with [`StoreError::LockTimeout`] once the lock wait begun at
    /// `started` has used up its budget.
    fn reopen_stale(&self, digest: &Digest, started: Instant) -> StoreResult<()> {
        debug!(digest = %digest.short_hex(), "locked file was unlinked; reopening");
        let waited = started.elapsed();
        if waited >= self.config.lock.timeout {
            warn!(digest = %digest, ?waited, "lock wait timed out");
            return Err(StoreError::LockTimeout {
                digest: digest.clone(),
                waited,
            });
        }
        Ok(())
    }

    /// Read the full stored content for `digest`.
    pub fn read_content(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let mut handle = self.open_for_read(digest)?;
        let mut data = Vec::new();
        handle.read_to_end(&mut data)?;
        handle.release()?;
        Ok(data)
    }

    /// Delete the content stored under `digest`.
    ///
    /// Deleting an absent digest succeeds. If a writer currently holds the
    /// object, fails immediately with [`StoreError::Busy`] instead of
    /// waiting. The shard directory is removed once it is empty.
    pub fn delete(&self, digest: &Digest) -> StoreResult<()> {
        let path = self.object_path(digest);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(digest = %digest.short_hex(), "delete of absent object");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match lock::try_lock(&file, LockMode::Shared) {
            Ok(()) => {}
            Err(e) if lock::is_contended(&e) => return Err(StoreError::Busy(digest.clone())),
            Err(e) => return Err(e.into()),
        }
        FileExt::unlock(&file)?;
        drop(file);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.remove_shard_if_empty(digest)?;
        debug!(digest = %digest.short_hex(), "deleted object");
        Ok(())
    }

    /// [`delete`](Self::delete), retried on [`StoreError::Busy`] with the
    /// configured fixed backoff.
    pub fn delete_with_retry(&self, digest: &Digest) -> StoreResult<()> {
        let policy = &self.config.delete_retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.delete(digest) {
                Err(StoreError::Busy(_)) if attempt < attempts => {
                    debug!(digest = %digest.short_hex(), attempt, "object busy; retrying delete");
                    thread::sleep(policy.backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Delete many objects, each under the bounded retry policy.
    ///
    /// Stops at the first object that cannot be deleted.
    pub fn delete_all(&self, digests: &[Digest]) -> StoreResult<()> {
        for digest in digests {
            self.delete_with_retry(digest)?;
        }
        debug!(count = digests.len(), "bulk delete complete");
        Ok(())
    }

    /// Stream the bytes of `src` into `dest` in fixed-size chunks.
    ///
    /// Returns the digest of the bytes that reached `dest`. Any read error or
    /// short write aborts the copy.
    pub fn copy_bytes<W: Write>(&self, src: &Path, dest: W) -> StoreResult<Digest> {
        let mut source = File::open(src)?;
        let mut sink = DigestWriter::new(dest);
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink.write_all(&buf[..n])?;
        }
        sink.flush()?;
        let copied = sink.bytes_written();
        let (_, digest) = sink.finish();
        debug!(bytes = copied, src = %src.display(), "copied content");
        Ok(digest)
    }

    /// Store the contents of the file at `src` and return its digest.
    ///
    /// Content that is already stored is not rewritten. If the source
    /// changes between digesting and copying, the write is rolled back with
    /// [`StoreError::HashMismatch`].
    pub fn save_content(&self, src: &Path) -> StoreResult<Digest> {
        self.ensure_root()?;
        let len = fs::metadata(src)?.len();
        let digest = DigestEngine::digest_of_file(src)?;
        if self.is_complete(&digest, len)? {
            debug!(digest = %digest.short_hex(), "content already stored");
            return Ok(digest);
        }
        self.write_object(&digest, |file| {
            let copied = self.copy_bytes(src, file)?;
            check_digest(&digest, copied)
        })?;
        debug!(digest = %digest.short_hex(), src = %src.display(), "saved content");
        Ok(digest)
    }

    /// Store `src` and wrap its digest in a [`Blob`].
    pub fn save_blob(&self, src: &Path) -> StoreResult<Blob> {
        self.save_content(src).map(Blob::new)
    }

    /// Store an in-memory byte sequence and return its digest.
    pub fn save_bytes(&self, data: &[u8]) -> StoreResult<Digest> {
        let digest = DigestEngine::digest_of_bytes(data);
        self.put_object(&digest, data)?;
        Ok(digest)
    }

    /// Store pre-encoded bytes under a caller-derived digest, skipping the
    /// write if the object already exists.
    pub(crate) fn put_object(&self, digest: &Digest, bytes: &[u8]) -> StoreResult<()> {
        self.ensure_root()?;
        if self.is_complete(digest, bytes.len() as u64)? {
            debug!(digest = %digest.short_hex(), "object already stored");
            return Ok(());
        }
        self.write_object(digest, |file| {
            file.write_all(bytes)?;
            Ok(())
        })?;
        debug!(digest = %digest.short_hex(), bytes = bytes.len(), "stored object");
        Ok(())
    }

    /// Run `write` against a staging file in the shard, then rename it into
    /// place. The content path only ever holds complete objects; on any
    /// failure the staging file is deleted before the error is returned.
    fn write_object<F>(&self, digest: &Digest, write: F) -> StoreResult<()>
    where
        F: FnOnce(&mut File) -> StoreResult<()>,
    {
        let mut staged = self.stage(digest)?;
        let outcome = write(staged.as_file_mut()).and_then(|()| Ok(staged.as_file().sync_all()?));
        if let Err(err) = outcome {
            self.rollback(digest, staged);
            return Err(err);
        }
        self.publish(digest, staged)
    }

    fn stage(&self, digest: &Digest) -> StoreResult<NamedTempFile> {
        let prefix = format!(".{digest}.");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".tmp");
        self.path_for(digest)?;
        let shard = self.shard_dir(digest);
        match builder.tempfile_in(&shard) {
            // A concurrent delete removed the now-empty shard.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&shard)?;
                Ok(builder.tempfile_in(&shard)?)
            }
            other => Ok(other?),
        }
    }

    /// Rename a finished staging file over the content path.
    ///
    /// A file already linked there is held under an exclusive lock for the
    /// rename, so its readers and writers finish first and then find the
    /// replacement.
    fn publish(&self, digest: &Digest, staged: NamedTempFile) -> StoreResult<()> {
        let guard = match self.lock_existing(digest, LockMode::Exclusive, Instant::now()) {
            Ok(handle) => Some(handle),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => {
                self.rollback(digest, staged);
                return Err(err);
            }
        };
        if let Err(e) = staged.persist(self.object_path(digest)) {
            drop(guard);
            self.rollback(digest, e.file);
            return Err(e.error.into());
        }
        drop(guard);
        Ok(())
    }

    fn rollback(&self, digest: &Digest, staged: NamedTempFile) {
        match staged.close() {
            Ok(()) => debug!(digest = %digest.short_hex(), "rolled back partial write"),
            Err(e) => warn!(digest = %digest, error = %e, "failed to roll back partial write"),
        }
        if let Err(e) = self.remove_shard_if_empty(digest) {
            debug!(digest = %digest.short_hex(), error = %e, "shard cleanup failed");
        }
    }

    /// Whether a finished object of `len` bytes exists under `digest`.
    ///
    /// Takes a shared lock so an in-progress writer is waited out. A file
    /// of the wrong length was created by a raw writer that has not yet
    /// locked or finished it, and does not count.
    fn is_complete(&self, digest: &Digest, len: u64) -> StoreResult<bool> {
        if !self.contains(digest) {
            return Ok(false);
        }
        let handle = match self.open_for_read(digest) {
            Ok(handle) => handle,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let stored = handle.file().metadata()?.len();
        handle.release()?;
        Ok(stored == len)
    }

    fn remove_shard_if_empty(&self, digest: &Digest) -> StoreResult<()> {
        match fs::remove_dir(self.shard_dir(digest)) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn create_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

fn check_digest(expected: &Digest, computed: Digest) -> StoreResult<()> {
    if *expected == computed {
        Ok(())
    } else {
        Err(StoreError::HashMismatch {
            expected: expected.clone(),
            computed,
        })
    }
}
