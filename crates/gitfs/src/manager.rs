use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use client::{TransactionManager, TxInfo};
use models::{CommitHash, CommitRequest, RefResolver};

use crate::fs::GitFilesystem;
use crate::resolver::{hash_to_oid, oid_to_hash, GitRefResolver};

/// Runs transactions against a repository: every transaction gets a private
/// linked worktree on an internal branch, commits advance the destination
/// branch, and cleanup prunes the workspace.
pub struct GitTransactionManager {
    repo_path: PathBuf,
    resolver: Arc<GitRefResolver>,
}

impl GitTransactionManager {
    pub fn new(repo_path: PathBuf, resolver: Arc<GitRefResolver>) -> Self {
        Self {
            repo_path,
            resolver,
        }
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> anyhow::Result<T> + Send + 'static,
) -> client::Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| client::Error::other(anyhow::anyhow!("blocked task failed: {err}")))?
        .map_err(client::Error::other)
}

fn signature(request: &CommitRequest) -> Result<git2::Signature<'static>, git2::Error> {
    match request.when {
        Some(when) => {
            let secs = when
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            git2::Signature::new(
                &request.author_name,
                &request.author_email,
                &git2::Time::new(secs, 0),
            )
        }
        None => git2::Signature::now(&request.author_name, &request.author_email),
    }
}

/// Force-checks-out HEAD when `branch` is what the primary worktree has
/// checked out, so the on-disk tree follows the advanced ref.
fn sync_primary_worktree(repo: &git2::Repository, branch: &str) -> Result<(), git2::Error> {
    let is_head = repo
        .head()
        .ok()
        .and_then(|head| head.shorthand().map(str::to_string))
        .is_some_and(|name| name == branch);
    if is_head {
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))?;
    }
    Ok(())
}

#[async_trait]
impl TransactionManager for GitTransactionManager {
    fn resolver(&self) -> &dyn RefResolver {
        &*self.resolver
    }

    #[tracing::instrument(level = "debug", skip(self, info), fields(tx = %info.target))]
    async fn init_target(&self, info: &TxInfo) -> client::Result<()> {
        let repo_path = self.repo_path.clone();
        let target = info.target.clone();

        blocking(move || {
            let repo = git2::Repository::open(&repo_path)?;
            let base = repo.find_commit(hash_to_oid(&target.base_commit))?;

            // The destination branch exists from here on, starting at base.
            if repo
                .find_branch(&target.dest_branch, git2::BranchType::Local)
                .is_err()
            {
                repo.branch(&target.dest_branch, &base, false)?;
            }

            // The private workspace: an internal branch at base, checked out
            // in a linked worktree named after the transaction.
            let workspace = target.workspace_name();
            let branch = repo.branch(&workspace, &base, false)?;

            let worktree_path = GitFilesystem::worktree_path(&repo_path, &target);
            if let Some(parent) = worktree_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let reference = branch.into_reference();
            let mut opts = git2::WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            repo.worktree(&workspace, &worktree_path, Some(&opts))?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self, info, request), fields(tx = %info.target))]
    async fn commit(&self, info: &TxInfo, request: &CommitRequest) -> client::Result<CommitHash> {
        let repo_path = self.repo_path.clone();
        let target = info.target.clone();
        let request = request.clone();

        blocking(move || {
            let worktree_path = GitFilesystem::worktree_path(&repo_path, &target);
            let repo = git2::Repository::open(&worktree_path)?;

            let mut index = repo.index()?;
            index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"], None)?;
            index.write()?;
            let tree_id = index.write_tree()?;

            let oid = {
                let tree = repo.find_tree(tree_id)?;
                let parent = repo.head()?.peel_to_commit()?;
                let sig = signature(&request)?;
                repo.commit(Some("HEAD"), &sig, &sig, &request.message(), &tree, &[&parent])?
            };

            // Advance the destination branch in the main repository. The
            // branch lock serializes writers, so a forced ref move is safe.
            let main = git2::Repository::open(&repo_path)?;
            main.reference(
                &format!("refs/heads/{}", target.dest_branch),
                oid,
                true,
                "transaction commit",
            )?;
            sync_primary_worktree(&main, &target.dest_branch)?;

            Ok(oid_to_hash(oid))
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self, info), fields(tx = %info.target))]
    async fn reset_to_clean_version(&self, info: &TxInfo) -> client::Result<()> {
        let repo_path = self.repo_path.clone();
        let target = info.target.clone();

        // Best effort throughout: the target may have failed halfway
        // through init, and a partially-created workspace must still be
        // removable.
        blocking(move || {
            let worktree_path = GitFilesystem::worktree_path(&repo_path, &target);
            if worktree_path.exists() {
                if let Ok(repo) = git2::Repository::open(&worktree_path) {
                    if let Ok(base) =
                        repo.find_object(hash_to_oid(&target.base_commit), None)
                    {
                        if let Err(err) = repo.reset(&base, git2::ResetType::Hard, None) {
                            tracing::warn!(error = %err, "failed to reset workspace");
                        }
                    }
                }
            }

            let Ok(main) = git2::Repository::open(&repo_path) else {
                return Ok(());
            };
            let workspace = target.workspace_name();
            if let Ok(worktree) = main.find_worktree(&workspace) {
                let mut opts = git2::WorktreePruneOptions::new();
                opts.valid(true).locked(true).working_tree(true);
                if let Err(err) = worktree.prune(Some(&mut opts)) {
                    tracing::warn!(error = %err, "failed to prune workspace");
                }
            }
            let _ = std::fs::remove_dir_all(&worktree_path);
            if let Ok(mut branch) = main.find_branch(&workspace, git2::BranchType::Local) {
                if let Err(err) = branch.delete() {
                    tracing::warn!(error = %err, "failed to delete workspace branch");
                }
            }
            Ok(())
        })
        .await
    }
}

/// Seeds a brand-new repository with an empty initial commit on `branch`,
/// so that transactions have a base to build on.
pub fn init_repository(path: &Path, branch: &str) -> crate::Result<CommitHash> {
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head(branch);
    let repo = git2::Repository::init_opts(path, &opts)?;

    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let sig = git2::Signature::now("gitstore", "gitstore@localhost")?;
    let oid = repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])?;
    Ok(oid_to_hash(oid))
}
