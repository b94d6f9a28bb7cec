use std::path::PathBuf;

use models::{CommitHash, RefResolver, VersionRef};

/// Resolves symbolic refs against the repository. Branches honor the
/// optional `before` offset by walking first parents back from the tip.
pub struct GitRefResolver {
    repo_path: PathBuf,
}

impl GitRefResolver {
    pub fn new(repo_path: PathBuf) -> Self {
        Self { repo_path }
    }

    fn resolve_inner(&self, version: &VersionRef) -> Result<CommitHash, git2::Error> {
        let repo = git2::Repository::open(&self.repo_path)?;
        let commit = resolve_commit(&repo, version)?;
        Ok(oid_to_hash(commit.id()))
    }
}

/// Resolves a [`VersionRef`] to the commit it names within `repo`.
pub(crate) fn resolve_commit<'r>(
    repo: &'r git2::Repository,
    version: &VersionRef,
) -> Result<git2::Commit<'r>, git2::Error> {
    match version {
        VersionRef::Hash(hash) => repo.find_commit(hash_to_oid(hash)),
        VersionRef::Branch { name, before } => {
            let branch = repo.find_branch(name, git2::BranchType::Local)?;
            let mut commit = branch.get().peel_to_commit()?;
            for _ in 0..before.unwrap_or(0) {
                commit = commit.parent(0)?;
            }
            Ok(commit)
        }
        VersionRef::Tag(name) | VersionRef::Unknown(name) => {
            repo.revparse_single(name)?.peel_to_commit()
        }
    }
}

impl RefResolver for GitRefResolver {
    fn resolve_ref(&self, version: &VersionRef) -> Result<CommitHash, models::Error> {
        self.resolve_inner(version).map_err(|err| {
            tracing::debug!(version = %version, error = %err, "ref resolution failed");
            models::Error::UnresolvableRef(version.to_string())
        })
    }
}

pub(crate) fn oid_to_hash(oid: git2::Oid) -> CommitHash {
    let bytes: [u8; 20] = oid.as_bytes().try_into().expect("oid is 20 bytes");
    CommitHash::new(bytes)
}

pub(crate) fn hash_to_oid(hash: &CommitHash) -> git2::Oid {
    git2::Oid::from_bytes(hash.as_bytes()).expect("hash is 20 bytes")
}
