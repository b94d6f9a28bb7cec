use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use models::{CommitHash, CommitRequest, MutableTarget, PullRequestRequest, VersionRef};

use crate::transaction::TxOptions;
use crate::Result;

/// Opens a review for a pushed branch. Concrete providers (GitHub, GitLab,
/// ...) live outside this workspace and are typically registered as a
/// post-commit hook.
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    async fn create_pull_request(&self, request: &PullRequestRequest) -> Result<()>;
}

/// Everything a hook may need to know about the transaction it observes.
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub base: VersionRef,
    pub target: MutableTarget,
    pub options: TxOptions,
}

/// Runs around a transaction's lifetime: `pre` at init, `post` during
/// cleanup.
#[async_trait]
pub trait TransactionHook: Send + Sync {
    async fn pre_transaction(&self, info: &TxInfo) -> Result<()>;
    async fn post_transaction(&self, info: &TxInfo) -> Result<()>;
}

/// Runs around the commit step.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn pre_commit(&self, info: &TxInfo, request: &CommitRequest) -> Result<()>;
    async fn post_commit(
        &self,
        info: &TxInfo,
        request: &CommitRequest,
        commit: &CommitHash,
    ) -> Result<()>;
}

/// An ordered hook list; execution short-circuits on the first error.
#[derive(Default)]
pub struct TransactionHookChain {
    hooks: RwLock<Vec<Arc<dyn TransactionHook>>>,
}

impl TransactionHookChain {
    pub fn register(&self, hook: Arc<dyn TransactionHook>) {
        self.hooks.write().expect("hook chain poisoned").push(hook);
    }

    fn snapshot(&self) -> Vec<Arc<dyn TransactionHook>> {
        self.hooks.read().expect("hook chain poisoned").clone()
    }

    pub async fn run_pre(&self, info: &TxInfo) -> Result<()> {
        for hook in self.snapshot() {
            hook.pre_transaction(info).await?;
        }
        Ok(())
    }

    pub async fn run_post(&self, info: &TxInfo) -> Result<()> {
        for hook in self.snapshot() {
            hook.post_transaction(info).await?;
        }
        Ok(())
    }
}

/// An ordered commit-hook list; execution short-circuits on the first error.
#[derive(Default)]
pub struct CommitHookChain {
    hooks: RwLock<Vec<Arc<dyn CommitHook>>>,
}

impl CommitHookChain {
    pub fn register(&self, hook: Arc<dyn CommitHook>) {
        self.hooks.write().expect("hook chain poisoned").push(hook);
    }

    fn snapshot(&self) -> Vec<Arc<dyn CommitHook>> {
        self.hooks.read().expect("hook chain poisoned").clone()
    }

    pub async fn run_pre(&self, info: &TxInfo, request: &CommitRequest) -> Result<()> {
        for hook in self.snapshot() {
            hook.pre_commit(info, request).await?;
        }
        Ok(())
    }

    pub async fn run_post(
        &self,
        info: &TxInfo,
        request: &CommitRequest,
        commit: &CommitHash,
    ) -> Result<()> {
        for hook in self.snapshot() {
            hook.post_commit(info, request, commit).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl TransactionHook for Counting {
        async fn pre_transaction(&self, _info: &TxInfo) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(crate::Error::other(anyhow::anyhow!("hook refused")))
            } else {
                Ok(())
            }
        }

        async fn post_transaction(&self, _info: &TxInfo) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn info() -> TxInfo {
        TxInfo {
            base: VersionRef::branch("main"),
            target: MutableTarget::new("main", models::CommitHash::new([0u8; 20])),
            options: TxOptions::default(),
        }
    }

    #[tokio::test]
    async fn chains_short_circuit_on_first_error() {
        let chain = TransactionHookChain::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        chain.register(Arc::new(Counting {
            calls: first.clone(),
            fail: true,
        }));
        chain.register(Arc::new(Counting {
            calls: second.clone(),
            fail: false,
        }));

        assert!(chain.run_pre(&info()).await.is_err());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }
}
