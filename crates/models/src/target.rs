use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CommitHash;

/// Identifies the in-progress writable workspace of one transaction: the
/// branch being written, the commit it was created from, and a unique id
/// distinguishing this transaction from any other against the same branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutableTarget {
    pub dest_branch: String,
    pub base_commit: CommitHash,
    pub uuid: Uuid,
}

impl MutableTarget {
    pub fn new(dest_branch: impl Into<String>, base_commit: CommitHash) -> Self {
        Self {
            dest_branch: dest_branch.into(),
            base_commit,
            uuid: Uuid::new_v4(),
        }
    }

    /// A filesystem-safe name for this transaction's private workspace.
    pub fn workspace_name(&self) -> String {
        format!("tx-{}", self.uuid.simple())
    }
}

impl std::fmt::Display for MutableTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.dest_branch, self.base_commit, self.uuid)
    }
}
