use std::path::PathBuf;

use async_trait::async_trait;
use client::Remote;

/// A named git remote driven through fetch and push. Pulls are strictly
/// fast-forward: a diverged local branch is an error for the caller (or the
/// error stream, in the PA mode).
pub struct GitRemote {
    repo_path: PathBuf,
    remote_name: String,
}

impl GitRemote {
    pub fn new(repo_path: impl Into<PathBuf>, remote_name: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote_name: remote_name.into(),
        }
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> anyhow::Result<T> + Send + 'static,
) -> client::Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| client::Error::other(anyhow::anyhow!("blocked task failed: {err}")))?
        .map_err(client::Error::remote)
}

#[async_trait]
impl Remote for GitRemote {
    #[tracing::instrument(level = "debug", skip(self), fields(remote = %self.remote_name))]
    async fn pull(&self, branch: &str) -> client::Result<()> {
        let repo_path = self.repo_path.clone();
        let remote_name = self.remote_name.clone();
        let branch = branch.to_string();

        blocking(move || {
            let repo = git2::Repository::open(&repo_path)?;
            let mut remote = repo.find_remote(&remote_name)?;
            remote.fetch(&[branch.as_str()], None, None)?;

            let tracking = format!("refs/remotes/{remote_name}/{branch}");
            let fetched = repo.find_reference(&tracking)?.peel_to_commit()?.id();

            match repo.find_branch(&branch, git2::BranchType::Local) {
                Ok(local) => {
                    let local_oid = local.get().peel_to_commit()?.id();
                    if local_oid == fetched {
                        return Ok(());
                    }
                    if !repo.graph_descendant_of(fetched, local_oid)? {
                        anyhow::bail!(
                            "branch '{branch}' has diverged from {remote_name} and cannot be fast-forwarded",
                        );
                    }
                    repo.reference(
                        &format!("refs/heads/{branch}"),
                        fetched,
                        true,
                        "fast-forward pull",
                    )?;
                    // Keep the working tree in step when the pulled branch
                    // is checked out.
                    if repo
                        .head()
                        .ok()
                        .and_then(|head| head.shorthand().map(str::to_string))
                        .is_some_and(|name| name == branch)
                    {
                        let mut checkout = git2::build::CheckoutBuilder::new();
                        checkout.force();
                        repo.checkout_head(Some(&mut checkout))?;
                    }
                }
                Err(_) => {
                    let commit = repo.find_commit(fetched)?;
                    repo.branch(&branch, &commit, false)?;
                }
            }
            Ok(())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(remote = %self.remote_name))]
    async fn push(&self, branch: &str) -> client::Result<()> {
        let repo_path = self.repo_path.clone();
        let remote_name = self.remote_name.clone();
        let branch = branch.to_string();

        blocking(move || {
            let repo = git2::Repository::open(&repo_path)?;
            let mut remote = repo.find_remote(&remote_name)?;
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            remote.push(&[refspec.as_str()], None)?;
            Ok(())
        })
        .await
    }
}
