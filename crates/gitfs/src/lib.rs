//! Git-backed implementations of the storage and transaction seams:
//! committed trees are read straight from the object database, every
//! transaction gets a private linked worktree, and a remote wrapper drives
//! fetch/fast-forward pulls and pushes.

mod fs;
mod manager;
mod remote;
mod resolver;

pub use self::fs::GitFilesystem;
pub use self::manager::{init_repository, GitTransactionManager};
pub use self::remote::GitRemote;
pub use self::resolver::GitRefResolver;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use models::Namespacer;
use storage::{FileFinder, HiddenPathExcluder};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository at '{0}' has not been initialized or cloned yet")]
    NotStarted(PathBuf),

    #[error("repository at '{0}' has no working tree and cannot be written")]
    ReadOnly(PathBuf),

    #[error(transparent)]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a repository keeps its per-transaction worktrees. Living under
/// `.git` keeps them out of the tracked tree and of watchers that skip
/// hidden paths.
pub(crate) fn worktrees_dir(repo_path: &Path) -> PathBuf {
    repo_path.join(".git").join("gitstore").join("worktrees")
}

/// The assembled Git-backed storage stack: filesystem, ref resolver,
/// transaction manager and file finder over one repository.
pub struct GitStore {
    pub filesystem: Arc<GitFilesystem>,
    pub resolver: Arc<GitRefResolver>,
    pub manager: Arc<GitTransactionManager>,
    pub finder: Arc<FileFinder>,
}

impl GitStore {
    /// Opens an existing (cloned or initialized) repository.
    pub fn open(repo_path: impl Into<PathBuf>, namespacer: Arc<dyn Namespacer>) -> Result<Self> {
        let repo_path = repo_path.into();
        let repo = git2::Repository::open(&repo_path)
            .map_err(|_| Error::NotStarted(repo_path.clone()))?;
        if repo.is_bare() {
            return Err(Error::ReadOnly(repo_path));
        }

        let filesystem = Arc::new(GitFilesystem::new(repo_path.clone()));
        let resolver = Arc::new(GitRefResolver::new(repo_path.clone()));
        let manager = Arc::new(GitTransactionManager::new(
            repo_path,
            resolver.clone(),
        ));
        let finder = Arc::new(FileFinder::new(
            filesystem.clone(),
            namespacer,
            Arc::new(HiddenPathExcluder),
        ));

        Ok(Self {
            filesystem,
            resolver,
            manager,
            finder,
        })
    }
}
