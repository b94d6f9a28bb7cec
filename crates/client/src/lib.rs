//! Typed CRUD over the unstructured storage, layered with branch-scoped,
//! hooked, time-bounded transactions and an optional distributed
//! (pull/lock/push) cache front-end.

mod backend;
mod client;
mod distributed;
mod filter;
mod hooks;
mod lock;
mod patch;
mod transaction;

pub use self::backend::{Backend, FileBackend, FileBackendOptions};
pub use self::client::Client;
pub use self::distributed::{CachePolicy, DistributedClient, Remote};
pub use self::filter::{Filter, ListOptions, Match};
pub use self::hooks::{
    CommitHook, CommitHookChain, PullRequestProvider, TransactionHook, TransactionHookChain,
    TxInfo,
};
pub use self::lock::BranchLockMap;
pub use self::patch::Patch;
pub use self::transaction::{
    Transaction, TransactionManager, TransactionalClient, TxContext, TxOptions, TxReceipt,
};

use models::{ObjectKey, VersionRef};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("version ref '{0}' is immutable; transactions require a branch tip")]
    VersionRefImmutable(VersionRef),

    #[error("a transaction with target '{0}' is already ongoing")]
    OngoingTransaction(String),

    #[error("transaction aborted: {cause}")]
    Aborted {
        #[source]
        cause: Box<Error>,
        /// Errors raised while restoring the pre-transaction state, kept
        /// alongside the originating error rather than replacing it.
        cleanup: Vec<String>,
    },

    #[error("object '{0}' already exists")]
    AlreadyExists(ObjectKey),

    #[error("object '{0}' was not found")]
    NotFound(ObjectKey),

    #[error("unsupported patch type '{0}'")]
    UnsupportedPatchType(String),

    #[error("partial-metadata objects cannot be written")]
    PartialObject,

    #[error("failed to apply patch: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("invalid filter parameters: {0}")]
    InvalidFilterParams(&'static str),

    #[error("remote operation failed: {0}")]
    Remote(#[source] anyhow::Error),

    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    #[error("transaction is no longer active")]
    Inactive,

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Frames(#[from] frames::Error),

    #[error(transparent)]
    Model(#[from] models::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl Error {
    pub fn remote(err: impl Into<anyhow::Error>) -> Self {
        Error::Remote(err.into())
    }

    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        Error::Other(err.into())
    }

    /// Type-based equality: variants compare equal regardless of payload.
    pub fn same_kind(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
