use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use models::MutableTarget;
use storage::{Error, FileInfo, Filesystem, FsView, Result};

use crate::resolver::resolve_commit;

/// A repository as a filesystem: without a [`MutableTarget`] the view is a
/// read-only snapshot of the commit the version resolves to, read straight
/// from the object database; with one, reads and writes hit that
/// transaction's private worktree.
pub struct GitFilesystem {
    repo_path: PathBuf,
}

impl GitFilesystem {
    pub fn new(repo_path: PathBuf) -> Self {
        Self { repo_path }
    }

    pub(crate) fn worktree_path(repo_path: &Path, target: &MutableTarget) -> PathBuf {
        crate::worktrees_dir(repo_path).join(target.workspace_name())
    }

    fn mutable_root(&self, view: &FsView) -> Result<PathBuf> {
        match &view.target {
            Some(target) => Ok(Self::worktree_path(&self.repo_path, target)),
            None => Err(Error::ImmutableFilesystem),
        }
    }

    /// Resolves `path` inside `root`, rejecting escapes.
    fn resolve(root: &Path, path: &Path) -> Result<PathBuf> {
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidPath(path.to_path_buf()));
        }
        Ok(root.join(path))
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| Error::backend(anyhow::anyhow!("blocked task failed: {err}")))?
}

fn map_git_err(err: git2::Error, path: &Path) -> Error {
    if err.code() == git2::ErrorCode::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::backend(err)
    }
}

fn map_io_err(err: std::io::Error, path: &Path) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(err)
    }
}

/// Looks up `path` in the tree of the commit `view.version` resolves to.
fn committed_entry(
    repo_path: &Path,
    view: &FsView,
    path: &Path,
) -> Result<(git2::Repository, git2::Oid, Option<git2::ObjectType>)> {
    let repo = git2::Repository::open(repo_path)
        .map_err(|err| Error::backend(anyhow::anyhow!("failed to open repository: {err}")))?;
    let (oid, kind) = {
        let commit =
            resolve_commit(&repo, &view.version).map_err(|err| map_git_err(err, path))?;
        let tree = commit.tree().map_err(|err| map_git_err(err, path))?;
        if path.as_os_str().is_empty() {
            (tree.id(), Some(git2::ObjectType::Tree))
        } else {
            let entry = tree.get_path(path).map_err(|err| map_git_err(err, path))?;
            (entry.id(), entry.kind())
        }
    };
    Ok((repo, oid, kind))
}

#[async_trait]
impl Filesystem for GitFilesystem {
    fn root_dir(&self) -> &Path {
        &self.repo_path
    }

    async fn read_file(&self, view: &FsView, path: &Path) -> Result<Bytes> {
        if view.is_mutable() {
            let full = Self::resolve(&self.mutable_root(view)?, path)?;
            let data = tokio::fs::read(&full)
                .await
                .map_err(|err| map_io_err(err, path))?;
            return Ok(Bytes::from(data));
        }

        let view = view.clone();
        let repo_path = self.repo_path.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let (repo, oid, kind) = committed_entry(&repo_path, &view, &path)?;
            if kind != Some(git2::ObjectType::Blob) {
                return Err(Error::NotFound(path));
            }
            let blob = repo.find_blob(oid).map_err(|err| map_git_err(err, &path))?;
            Ok(Bytes::copy_from_slice(blob.content()))
        })
        .await
    }

    async fn write_file(&self, view: &FsView, path: &Path, data: &[u8]) -> Result<()> {
        let full = Self::resolve(&self.mutable_root(view)?, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    async fn stat(&self, view: &FsView, path: &Path) -> Result<FileInfo> {
        if view.is_mutable() {
            let full = Self::resolve(&self.mutable_root(view)?, path)?;
            let meta = tokio::fs::metadata(&full)
                .await
                .map_err(|err| map_io_err(err, path))?;
            return Ok(FileInfo {
                path: path.to_path_buf(),
                size: meta.len(),
                is_dir: meta.is_dir(),
            });
        }

        let view = view.clone();
        let repo_path = self.repo_path.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let (repo, oid, kind) = committed_entry(&repo_path, &view, &path)?;
            match kind {
                Some(git2::ObjectType::Tree) => Ok(FileInfo {
                    path,
                    size: 0,
                    is_dir: true,
                }),
                Some(git2::ObjectType::Blob) => {
                    let blob = repo.find_blob(oid).map_err(|err| map_git_err(err, &path))?;
                    Ok(FileInfo {
                        path,
                        size: blob.size() as u64,
                        is_dir: false,
                    })
                }
                _ => Err(Error::NotFound(path)),
            }
        })
        .await
    }

    async fn remove(&self, view: &FsView, path: &Path) -> Result<()> {
        let full = Self::resolve(&self.mutable_root(view)?, path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|err| map_io_err(err, path))?;
        Ok(())
    }

    async fn mkdir_all(&self, view: &FsView, path: &Path) -> Result<()> {
        let full = Self::resolve(&self.mutable_root(view)?, path)?;
        tokio::fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn read_dir(&self, view: &FsView, path: &Path) -> Result<Vec<FileInfo>> {
        if view.is_mutable() {
            let root = self.mutable_root(view)?;
            let full = Self::resolve(&root, path)?;
            let mut entries = Vec::new();
            let mut dir = tokio::fs::read_dir(&full)
                .await
                .map_err(|err| map_io_err(err, path))?;
            while let Some(entry) = dir.next_entry().await? {
                let meta = entry.metadata().await?;
                entries.push(FileInfo {
                    path: path.join(entry.file_name()),
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                });
            }
            return Ok(entries);
        }

        let view = view.clone();
        let repo_path = self.repo_path.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let (repo, oid, kind) = committed_entry(&repo_path, &view, &path)?;
            if kind != Some(git2::ObjectType::Tree) {
                return Err(Error::NotFound(path));
            }
            let tree = repo.find_tree(oid).map_err(|err| map_git_err(err, &path))?;

            let mut entries = Vec::new();
            for entry in tree.iter() {
                let Some(name) = entry.name() else { continue };
                let entry_path = path.join(name);
                match entry.kind() {
                    Some(git2::ObjectType::Tree) => entries.push(FileInfo {
                        path: entry_path,
                        size: 0,
                        is_dir: true,
                    }),
                    Some(git2::ObjectType::Blob) => {
                        let size = repo
                            .find_blob(entry.id())
                            .map(|blob| blob.size() as u64)
                            .unwrap_or(0);
                        entries.push(FileInfo {
                            path: entry_path,
                            size,
                            is_dir: false,
                        });
                    }
                    // Submodules and other entry kinds are not documents.
                    _ => continue,
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn checksum(&self, view: &FsView, path: &Path) -> Result<String> {
        if view.is_mutable() {
            let full = Self::resolve(&self.mutable_root(view)?, path)?;
            let meta = tokio::fs::metadata(&full)
                .await
                .map_err(|err| map_io_err(err, path))?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            return Ok(format!("{}-{}", meta.len(), mtime));
        }

        // The blob id is stable per content, which is strictly stronger
        // than stable per commit.
        let view = view.clone();
        let repo_path = self.repo_path.clone();
        let path = path.to_path_buf();
        blocking(move || {
            let (_repo, oid, kind) = committed_entry(&repo_path, &view, &path)?;
            if kind != Some(git2::ObjectType::Blob) {
                return Err(Error::NotFound(path));
            }
            Ok(oid.to_string())
        })
        .await
    }
}
