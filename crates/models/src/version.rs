use serde::{Deserialize, Serialize};

use crate::CommitHash;

/// A symbolic handle to a revision of the repository. Branches are the only
/// writable variant; everything else resolves to an immutable commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionRef {
    /// An immutable commit.
    Hash(CommitHash),
    /// A branch tip, optionally offset `before` commits back from it.
    /// An offset branch is a historical (read-only) view.
    Branch {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<u32>,
    },
    /// An annotated or lightweight tag.
    Tag(String),
    /// A ref string the core does not interpret; resolution is entirely up
    /// to the provider.
    Unknown(String),
}

impl VersionRef {
    pub fn branch(name: impl Into<String>) -> Self {
        VersionRef::Branch {
            name: name.into(),
            before: None,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        VersionRef::Tag(name.into())
    }

    /// Parses the caller-opaque string form: a 40-hex string is a commit
    /// hash, anything else is left to the provider to interpret.
    pub fn parse(s: &str) -> Self {
        if s.len() == 40 {
            if let Ok(hash) = CommitHash::from_hex(s) {
                return VersionRef::Hash(hash);
            }
        }
        VersionRef::Unknown(s.to_string())
    }

    /// Only a branch tip (no `before` offset) may be written to.
    pub fn is_writable(&self) -> bool {
        matches!(self, VersionRef::Branch { before: None, .. })
    }

    pub fn branch_name(&self) -> Option<&str> {
        match self {
            VersionRef::Branch { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn resolve(&self, resolver: &dyn RefResolver) -> Result<CommitHash, crate::Error> {
        match self {
            VersionRef::Hash(hash) => Ok(*hash),
            _ => resolver.resolve_ref(self),
        }
    }
}

impl std::fmt::Display for VersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRef::Hash(hash) => write!(f, "{hash}"),
            VersionRef::Branch { name, before: None } => f.write_str(name),
            VersionRef::Branch {
                name,
                before: Some(n),
            } => write!(f, "{name}~{n}"),
            VersionRef::Tag(name) => f.write_str(name),
            VersionRef::Unknown(s) => f.write_str(s),
        }
    }
}

/// Resolves symbolic refs to commits. Implemented by the Git backend.
pub trait RefResolver: Send + Sync {
    fn resolve_ref(&self, version: &VersionRef) -> Result<CommitHash, crate::Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_recognizes_hashes() {
        let parsed = VersionRef::parse("aaf02aeb91b4164bbb0840a4f2e1b23b4a876bd6");
        assert!(matches!(parsed, VersionRef::Hash(_)));

        let parsed = VersionRef::parse("main");
        assert_eq!(parsed, VersionRef::Unknown("main".to_string()));
    }

    #[test]
    fn only_branch_tips_are_writable() {
        assert!(VersionRef::branch("main").is_writable());
        assert!(!VersionRef::Branch {
            name: "main".to_string(),
            before: Some(1),
        }
        .is_writable());
        assert!(!VersionRef::tag("v1.0.0").is_writable());
        assert!(!VersionRef::parse("aaf02aeb91b4164bbb0840a4f2e1b23b4a876bd6").is_writable());
    }
}
