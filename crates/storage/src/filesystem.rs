use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use models::{MutableTarget, VersionRef};

use crate::{Error, Result};

/// Which revision of the repository a filesystem operation addresses.
/// Without a [`MutableTarget`] the view is a read-only snapshot at
/// `version`; with one, reads and writes hit that transaction's private
/// workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct FsView {
    pub version: VersionRef,
    pub target: Option<MutableTarget>,
}

impl FsView {
    pub fn read_only(version: VersionRef) -> Self {
        Self {
            version,
            target: None,
        }
    }

    pub fn mutable(target: MutableTarget) -> Self {
        Self {
            version: VersionRef::branch(target.dest_branch.clone()),
            target: Some(target),
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.target.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the filesystem root.
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

/// The filesystem capability set the storage layer consumes. All paths are
/// relative to [`root_dir`]; implementations resolve them per view.
///
/// `checksum` returns an opaque token that changes whenever the file's
/// content may have changed: a content hash for committed views, a
/// size/mtime token for mutable workspaces.
///
/// [`root_dir`]: Filesystem::root_dir
#[async_trait]
pub trait Filesystem: Send + Sync {
    fn root_dir(&self) -> &Path;

    async fn read_file(&self, view: &FsView, path: &Path) -> Result<Bytes>;
    async fn write_file(&self, view: &FsView, path: &Path, data: &[u8]) -> Result<()>;
    async fn stat(&self, view: &FsView, path: &Path) -> Result<FileInfo>;
    async fn remove(&self, view: &FsView, path: &Path) -> Result<()>;
    async fn mkdir_all(&self, view: &FsView, path: &Path) -> Result<()>;
    async fn read_dir(&self, view: &FsView, path: &Path) -> Result<Vec<FileInfo>>;
    async fn checksum(&self, view: &FsView, path: &Path) -> Result<String>;

    async fn exists(&self, view: &FsView, path: &Path) -> Result<bool> {
        match self.stat(view, path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Vetoes paths the storage layer must ignore, on a relative-path basis.
pub trait PathExcluder: Send + Sync {
    fn is_excluded(&self, path: &Path) -> bool;
}

/// Excludes every path with a hidden (dot-prefixed) component, which in
/// particular covers `.git`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenPathExcluder;

impl PathExcluder for HiddenPathExcluder {
    fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }
}

/// Recursively lists all regular files under `start`, honoring `excluder`.
pub async fn walk(
    fs: &dyn Filesystem,
    view: &FsView,
    excluder: &dyn PathExcluder,
) -> Result<Vec<PathBuf>> {
    let mut pending = vec![PathBuf::new()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        for entry in fs.read_dir(view, &dir).await? {
            if excluder.is_excluded(&entry.path) {
                continue;
            }
            if entry.is_dir {
                pending.push(entry.path);
            } else {
                files.push(entry.path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// A plain directory exposed as a single mutable view. The base of the
/// watch-driven deployments and of tests; Git-backed views live in the
/// `gitfs` crate.
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidPath(path.to_path_buf()));
        }
        Ok(self.root.join(path))
    }

    fn require_mutable(view: &FsView) -> Result<()> {
        if view.is_mutable() {
            Ok(())
        } else {
            Err(Error::ImmutableFilesystem)
        }
    }
}

fn map_not_found(err: std::io::Error, path: &Path) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    fn root_dir(&self) -> &Path {
        &self.root
    }

    async fn read_file(&self, _view: &FsView, path: &Path) -> Result<Bytes> {
        let full = self.resolve(path)?;
        let data = tokio::fs::read(&full)
            .await
            .map_err(|err| map_not_found(err, path))?;
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, view: &FsView, path: &Path, data: &[u8]) -> Result<()> {
        Self::require_mutable(view)?;
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    async fn stat(&self, _view: &FsView, path: &Path) -> Result<FileInfo> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|err| map_not_found(err, path))?;
        Ok(FileInfo {
            path: path.to_path_buf(),
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    async fn remove(&self, view: &FsView, path: &Path) -> Result<()> {
        Self::require_mutable(view)?;
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|err| map_not_found(err, path))?;
        Ok(())
    }

    async fn mkdir_all(&self, view: &FsView, path: &Path) -> Result<()> {
        Self::require_mutable(view)?;
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn read_dir(&self, _view: &FsView, path: &Path) -> Result<Vec<FileInfo>> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|err| map_not_found(err, path))?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(FileInfo {
                path: path.join(entry.file_name()),
                size: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        Ok(entries)
    }

    async fn checksum(&self, view: &FsView, path: &Path) -> Result<String> {
        let info = self.stat(view, path).await?;
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|err| map_not_found(err, path))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(format!("{}-{}", info.size, mtime))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::CommitHash;

    fn mutable_view() -> FsView {
        FsView::mutable(MutableTarget::new("main", CommitHash::new([0u8; 20])))
    }

    #[tokio::test]
    async fn writes_require_a_mutable_view() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());

        let read_only = FsView::read_only(VersionRef::branch("main"));
        let err = fs
            .write_file(&read_only, Path::new("a.yaml"), b"a: 1\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImmutableFilesystem));

        fs.write_file(&mutable_view(), Path::new("a.yaml"), b"a: 1\n")
            .await
            .unwrap();
        let data = fs.read_file(&read_only, Path::new("a.yaml")).await.unwrap();
        assert_eq!(&data[..], b"a: 1\n");
    }

    #[tokio::test]
    async fn walk_skips_hidden_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let view = mutable_view();

        fs.write_file(&view, Path::new("ns/app.yaml"), b"a: 1\n")
            .await
            .unwrap();
        fs.write_file(&view, Path::new(".git/config"), b"[core]\n")
            .await
            .unwrap();
        fs.write_file(&view, Path::new("top.json"), b"{}\n")
            .await
            .unwrap();

        let files = walk(&fs, &view, &HiddenPathExcluder).await.unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("ns/app.yaml"), PathBuf::from("top.json")]
        );
    }

    #[tokio::test]
    async fn checksum_tracks_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let view = mutable_view();

        fs.write_file(&view, Path::new("a.yaml"), b"a: 1\n")
            .await
            .unwrap();
        let first = fs.checksum(&view, Path::new("a.yaml")).await.unwrap();

        fs.write_file(&view, Path::new("a.yaml"), b"a: 1234\n")
            .await
            .unwrap();
        let second = fs.checksum(&view, Path::new("a.yaml")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let err = fs
            .read_file(&mutable_view(), Path::new("../escape.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }
}
