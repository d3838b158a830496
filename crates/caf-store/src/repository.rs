use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::StoreConfig;
use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::object::Blob;

/// Name of the object directory inside a repository.
pub const OBJECTS_SUBDIR: &str = "objects";

/// A repository directory inside a working directory, holding the object
/// store under `objects/`.
#[derive(Clone, Debug)]
pub struct Repository {
    working_dir: PathBuf,
    repo_dir: PathBuf,
    config: StoreConfig,
}

impl Repository {
    pub fn new(working_dir: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(working_dir, repo_dir, StoreConfig::default())
    }

    pub fn with_config(
        working_dir: impl Into<PathBuf>,
        repo_dir: impl Into<PathBuf>,
        config: StoreConfig,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            repo_dir: repo_dir.into(),
            config,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// `<working_dir>/<repo_dir>`.
    pub fn repo_path(&self) -> PathBuf {
        self.working_dir.join(&self.repo_dir)
    }

    /// Root of the repository's content store.
    pub fn objects_dir(&self) -> PathBuf {
        self.repo_path().join(OBJECTS_SUBDIR)
    }

    pub fn exists(&self) -> bool {
        self.repo_path().is_dir()
    }

    /// Create the repository and its object directory.
    ///
    /// Fails with an `AlreadyExists` I/O error if the repository directory
    /// is already present.
    pub fn init(&self) -> StoreResult<()> {
        let repo_path = self.repo_path();
        if let Some(parent) = repo_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(&repo_path)?;
        fs::create_dir(self.objects_dir())?;
        info!(path = %repo_path.display(), "initialized repository");
        Ok(())
    }

    /// The content store rooted at [`objects_dir`](Self::objects_dir).
    pub fn store(&self) -> StoreResult<ContentStore> {
        self.require_initialized()?;
        ContentStore::with_config(self.objects_dir(), self.config.clone())
    }

    /// Store a working-tree file's contents as a blob.
    pub fn save_file(&self, file: &Path) -> StoreResult<Blob> {
        self.store()?.save_blob(file)
    }

    fn require_initialized(&self) -> StoreResult<()> {
        if !self.exists() {
            return Err(StoreError::InvalidArgument(format!(
                "repository not initialized at {}",
                self.repo_path().display()
            )));
        }
        Ok(())
    }
}
