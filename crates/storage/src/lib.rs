//! Unstructured filesystem storage: a capability-based filesystem with
//! multi-version views, a bi-directional object-identity to file-path map,
//! and a file-event driven synchronizer that turns inotify-style events into
//! semantic object events.

mod filesystem;
mod finder;

pub mod events;

pub use self::filesystem::{
    walk, FileInfo, Filesystem, FsView, HiddenPathExcluder, LocalFilesystem, PathExcluder,
};
pub use self::finder::{content_type_of, scan_objects, FileFinder, MappingDiff, SyncOutcome};

use std::path::PathBuf;

use models::ObjectKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the filesystem view is immutable; writes require an active transaction target")]
    ImmutableFilesystem,

    #[error("object '{0}' is tracked in more than one file")]
    DuplicateTracking(ObjectKey),

    #[error("file '{0}' was not found")]
    NotFound(PathBuf),

    #[error("path '{0}' escapes the filesystem root")]
    InvalidPath(PathBuf),

    #[error("an event subscriber is already registered")]
    TooManyWatches,

    #[error("failed to watch '{path}'")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    Frames(#[from] frames::Error),

    #[error(transparent)]
    Model(#[from] models::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl Error {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        Error::Backend(err.into())
    }

    /// Type-based equality: variants compare equal regardless of payload.
    pub fn same_kind(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
