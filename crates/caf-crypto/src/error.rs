use std::io;
use std::path::PathBuf;

/// Errors from digest computation.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The input could not be opened or a read failed mid-stream.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DigestError {
    /// Unwrap into the underlying I/O error.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io { source, .. } => source,
        }
    }
}
