mod hash;
mod id;
mod namespace;
mod object;
mod request;
mod target;
mod version;

pub use self::hash::CommitHash;
pub use self::id::{GroupKind, ObjectId, ObjectKey};
pub use self::namespace::{validate_namespacing, FixedNamespacer, Namespacer};
pub use self::object::{Object, ObjectMeta, PartialObject, Unstructured};
pub use self::request::{CommitRequest, PullRequestRequest};
pub use self::target::MutableTarget;
pub use self::version::{RefResolver, VersionRef};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid commit hash: '{0}'")]
    InvalidHash(String),

    #[error("version ref '{0}' cannot be resolved to a commit")]
    UnresolvableRef(String),

    #[error("invalid namespacing for kind '{kind}' with namespace {namespace:?}")]
    InvalidNamespacing {
        kind: GroupKind,
        namespace: Option<String>,
    },

    #[error("unknown group-kind '{0}'")]
    UnknownKind(GroupKind),

    #[error("commit request is missing required field '{0}'")]
    MissingRequestField(&'static str),

    #[error("not a valid object: missing field '{0}'")]
    MissingObjectField(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
