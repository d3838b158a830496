use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use caf_types::Digest;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::LockPolicy;
use crate::error::{StoreError, StoreResult};

/// Lower bound on the pause between lock attempts.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Advisory lock mode held by a [`LockedFile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of readers.
    Shared,
    /// A single writer, excluding readers.
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// An open content file holding an advisory lock.
///
/// The lock is released and the file closed when the handle is dropped, on
/// every exit path. Call [`release`](Self::release) to release explicitly
/// and observe flush or unlock errors.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
    digest: Digest,
    mode: LockMode,
    released: bool,
}

impl LockedFile {
    /// Lock `file` in `mode`, polling until the policy's timeout, counted
    /// from `started`, elapses.
    pub(crate) fn acquire(
        file: File,
        path: PathBuf,
        digest: Digest,
        mode: LockMode,
        policy: &LockPolicy,
        started: Instant,
    ) -> StoreResult<Self> {
        loop {
            match try_lock(&file, mode) {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= policy.timeout {
                        warn!(digest = %digest, %mode, ?waited, "lock wait timed out");
                        return Err(StoreError::LockTimeout { digest, waited });
                    }
                    let remaining = policy.timeout - waited;
                    thread::sleep(policy.poll_interval.max(MIN_POLL).min(remaining));
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(digest = %digest.short_hex(), %mode, "lock acquired");
        Ok(Self {
            file,
            path,
            digest,
            mode,
            released: false,
        })
    }

    /// Filesystem path of the content file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Digest the content file is stored under.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Lock mode held by this handle.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The underlying file.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Whether the locked file is still the one linked at [`path`](Self::path).
    ///
    /// A delete or a replacing rename can unlink the file while a caller is
    /// still waiting for its lock; such a handle reaches no digest.
    pub(crate) fn is_current(&self) -> io::Result<bool> {
        let held = self.file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(linked) => Ok(same_file(&held, &linked)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Flush to stable storage (writers only), then unlock and close.
    pub fn release(mut self) -> StoreResult<()> {
        if self.mode == LockMode::Exclusive {
            self.file.sync_all()?;
        }
        FileExt::unlock(&self.file)?;
        self.released = true;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = FileExt::unlock(&self.file) {
                debug!(path = %self.path.display(), error = %e, "unlock on drop failed");
            }
        }
    }
}

impl Read for LockedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for LockedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// Open files cannot be unlinked or renamed over on Windows.
#[cfg(not(unix))]
fn same_file(_: &Metadata, _: &Metadata) -> bool {
    true
}

/// One non-blocking lock attempt.
///
/// Called through `FileExt` explicitly so newer toolchains do not resolve to
/// the inherent `File` locking methods, which report contention differently.
pub(crate) fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    match mode {
        LockMode::Shared => FileExt::try_lock_shared(file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(file),
    }
}

/// Whether a failed lock attempt means another holder owns the lock.
pub(crate) fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn digest() -> Digest {
        caf_crypto::DigestEngine::digest_of_bytes(b"lock test")
    }

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .unwrap()
    }

    fn short_policy() -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        let a = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Shared,
            &short_policy(),
            Instant::now(),
        )
        .unwrap();
        let b = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Shared,
            &short_policy(),
            Instant::now(),
        )
        .unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        b.release().unwrap();
        a.release().unwrap();
    }

    #[test]
    fn exclusive_blocks_until_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        let _held = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Exclusive,
            &short_policy(),
            Instant::now(),
        )
        .unwrap();

        let start = Instant::now();
        let err = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Shared,
            &short_policy(),
            Instant::now(),
        )
        .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        {
            let _held = LockedFile::acquire(
                open(&path),
                path.clone(),
                digest(),
                LockMode::Exclusive,
                &short_policy(),
                Instant::now(),
            )
            .unwrap();
        }
        let again = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Exclusive,
            &short_policy(),
            Instant::now(),
        );
        assert!(again.is_ok());
    }

    #[test]
    fn unlinked_file_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        let held = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Exclusive,
            &short_policy(),
            Instant::now(),
        )
        .unwrap();
        assert!(held.is_current().unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(!held.is_current().unwrap());

        // A new file at the same path is a different file.
        std::fs::write(&path, b"replacement").unwrap();
        assert!(!held.is_current().unwrap());
    }

    #[test]
    fn wait_budget_counts_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        let _held = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Exclusive,
            &short_policy(),
            Instant::now(),
        )
        .unwrap();

        // A budget already spent fails after a single attempt.
        let started = Instant::now() - Duration::from_secs(1);
        let attempt = Instant::now();
        let err = LockedFile::acquire(
            open(&path),
            path.clone(),
            digest(),
            LockMode::Shared,
            &short_policy(),
            started,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert!(attempt.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn lock_mode_display() {
        assert_eq!(LockMode::Shared.to_string(), "shared");
        assert_eq!(LockMode::Exclusive.to_string(), "exclusive");
    }
}
