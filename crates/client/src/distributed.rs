use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use models::{CommitHash, CommitRequest, GroupKind, Object, ObjectKey, VersionRef};
use storage::FsView;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::hooks::{CommitHook, TransactionHook, TxInfo};
use crate::transaction::{Transaction, TransactionalClient, TxOptions};
use crate::{Error, ListOptions, Result};

/// The remote a repository synchronizes with. Locking is optional; a remote
/// without it still supports the PC modes.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn pull(&self, branch: &str) -> Result<()>;
    async fn push(&self, branch: &str) -> Result<()>;

    fn supports_locking(&self) -> bool {
        false
    }

    async fn lock(&self, _branch: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn unlock(&self, _branch: &str) -> Result<()> {
        Ok(())
    }
}

/// Consistency/availability trade-off for reads against writable refs,
/// modelled on PACELC.
///
/// | mode  | `cache_valid` | `error_stream` |
/// |-------|---------------|----------------|
/// | PC/EC | zero          | none           |
/// | PC/EL | positive      | none           |
/// | PA/EL | positive      | channel        |
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// How long a pull satisfies subsequent reads. Zero re-pulls on every
    /// read.
    pub cache_valid: Duration,
    /// When set, pull failures are forwarded here asynchronously and reads
    /// proceed with cached data instead of failing.
    pub error_stream: Option<mpsc::Sender<Error>>,
}

impl CachePolicy {
    /// Always consistent: pull before every read, fail on partition.
    pub fn pc_ec() -> Self {
        Self {
            cache_valid: Duration::ZERO,
            error_stream: None,
        }
    }

    /// Consistent under partition, cached otherwise.
    pub fn pc_el(cache_valid: Duration) -> Self {
        Self {
            cache_valid,
            error_stream: None,
        }
    }

    /// Available under partition: serve cached data and report the error
    /// out of band.
    pub fn pa_el(cache_valid: Duration, error_stream: mpsc::Sender<Error>) -> Self {
        Self {
            cache_valid,
            error_stream: Some(error_stream),
        }
    }
}

#[derive(Default)]
struct BranchState {
    last_pull: Option<Instant>,
}

/// Per-branch remote bookkeeping: one async mutex per branch serializes
/// pull/push/lock/unlock and guards the pull timestamp; distinct branches
/// proceed concurrently.
struct RemoteState {
    remote: Arc<dyn Remote>,
    policy: CachePolicy,
    branches: StdMutex<HashMap<String, Arc<AsyncMutex<BranchState>>>>,
}

impl RemoteState {
    fn branch(&self, name: &str) -> Arc<AsyncMutex<BranchState>> {
        self.branches
            .lock()
            .expect("branch states poisoned")
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Pulls unconditionally, recording the pull time.
    async fn pull_now(&self, branch: &str) -> Result<()> {
        let cell = self.branch(branch);
        let mut guard = cell.lock().await;
        self.remote.pull(branch).await?;
        guard.last_pull = Some(Instant::now());
        Ok(())
    }

    async fn push_now(&self, branch: &str) -> Result<()> {
        let cell = self.branch(branch);
        let _guard = cell.lock().await;
        self.remote.push(branch).await
    }

    /// The read-path pull, gated by the cache policy.
    async fn pull_if_stale(&self, branch: &str) -> Result<()> {
        let cell = self.branch(branch);
        let mut guard = cell.lock().await;

        let fresh = guard
            .last_pull
            .is_some_and(|at| at.elapsed() < self.policy.cache_valid);
        if fresh {
            return Ok(());
        }

        match self.remote.pull(branch).await {
            Ok(()) => {
                guard.last_pull = Some(Instant::now());
                Ok(())
            }
            Err(err) => match &self.policy.error_stream {
                // PC: the partition fails the operation.
                None => Err(err),
                // PA: report asynchronously, serve cached data.
                Some(stream) => {
                    tracing::warn!(branch, error = %err, "pull failed; serving cached data");
                    let stream = stream.clone();
                    tokio::spawn(async move {
                        let _ = stream.send(err).await;
                    });
                    Ok(())
                }
            },
        }
    }
}

/// Wraps a [`TransactionalClient`] with a remote: reads against writable
/// refs pull when stale per the cache policy, and transactions run inside
/// lock/pull ... push/unlock hooks installed on the inner client's chains.
pub struct DistributedClient {
    inner: TransactionalClient,
    state: Arc<RemoteState>,
    default_branch: String,
}

impl DistributedClient {
    pub fn new(
        inner: TransactionalClient,
        remote: Arc<dyn Remote>,
        policy: CachePolicy,
        default_branch: impl Into<String>,
    ) -> Self {
        let state = Arc::new(RemoteState {
            remote,
            policy,
            branches: StdMutex::new(HashMap::new()),
        });
        let hooks = Arc::new(RemoteHooks {
            state: state.clone(),
        });
        inner.transaction_hooks().register(hooks.clone());
        inner.commit_hooks().register(hooks);

        Self {
            inner,
            state,
            default_branch: default_branch.into(),
        }
    }

    pub fn transactional(&self) -> &TransactionalClient {
        &self.inner
    }

    async fn ensure_fresh(&self, version: &VersionRef) -> Result<()> {
        match version {
            VersionRef::Branch { name, before: None } => self.state.pull_if_stale(name).await,
            _ => Ok(()),
        }
    }

    pub async fn get<O: Object>(&self, view: &FsView, key: &ObjectKey) -> Result<O> {
        self.ensure_fresh(&view.version).await?;
        self.inner.get(view, key).await
    }

    pub async fn list<O: Object>(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        options: &ListOptions,
    ) -> Result<Vec<O>> {
        self.ensure_fresh(&view.version).await?;
        self.inner.list(view, group_kind, options).await
    }

    pub async fn transaction(&self, base: &VersionRef, options: TxOptions) -> Result<Transaction> {
        self.inner.transaction(base, options).await
    }

    pub async fn branch_transaction(
        &self,
        base: &VersionRef,
        head: &str,
        options: TxOptions,
    ) -> Result<Transaction> {
        self.inner.branch_transaction(base, head, options).await
    }

    /// Background pulls of `branches` (the default branch when empty) at a
    /// fixed rate until `token` is cancelled.
    pub fn start_resync_loop(
        &self,
        token: CancellationToken,
        interval: Duration,
        branches: Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        let branches = if branches.is_empty() {
            vec![self.default_branch.clone()]
        } else {
            branches
        };
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for branch in &branches {
                            if let Err(err) = state.pull_now(branch).await {
                                match &state.policy.error_stream {
                                    Some(stream) => {
                                        let _ = stream.send(err).await;
                                    }
                                    None => {
                                        tracing::warn!(branch = %branch, error = %err, "background pull failed");
                                    }
                                }
                            }
                        }
                    }
                }
            }
            tracing::debug!("resync loop stopped");
        })
    }
}

/// The hook half of the distributed client, registered on both chains of
/// the wrapped transactional client.
struct RemoteHooks {
    state: Arc<RemoteState>,
}

#[async_trait]
impl TransactionHook for RemoteHooks {
    async fn pre_transaction(&self, info: &TxInfo) -> Result<()> {
        let branch = &info.target.dest_branch;
        if self.state.remote.supports_locking() {
            let cell = self.state.branch(branch);
            let _guard = cell.lock().await;
            self.state
                .remote
                .lock(branch, info.options.timeout)
                .await?;
        }
        if let Some(base) = info.base.branch_name() {
            self.state.pull_now(base).await?;
        }
        Ok(())
    }

    async fn post_transaction(&self, info: &TxInfo) -> Result<()> {
        if self.state.remote.supports_locking() {
            let branch = &info.target.dest_branch;
            let cell = self.state.branch(branch);
            let _guard = cell.lock().await;
            self.state.remote.unlock(branch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommitHook for RemoteHooks {
    async fn pre_commit(&self, _info: &TxInfo, _request: &CommitRequest) -> Result<()> {
        Ok(())
    }

    async fn post_commit(
        &self,
        info: &TxInfo,
        _request: &CommitRequest,
        commit: &CommitHash,
    ) -> Result<()> {
        tracing::debug!(branch = %info.target.dest_branch, commit = %commit, "pushing");
        // A push failure after a successful local commit does not roll the
        // commit back; the error surfaces to the committer.
        self.state.push_now(&info.target.dest_branch).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Backend, Client, FileBackend, FileBackendOptions, TransactionManager};
    use models::{FixedNamespacer, RefResolver, Unstructured};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::{FileFinder, HiddenPathExcluder, LocalFilesystem};

    #[derive(Default)]
    struct MockRemote {
        log: StdMutex<Vec<String>>,
        fail_pulls: AtomicUsize,
        lockable: bool,
    }

    impl MockRemote {
        fn log_entry(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Remote for MockRemote {
        async fn pull(&self, branch: &str) -> Result<()> {
            if self.fail_pulls.load(Ordering::SeqCst) > 0 {
                self.fail_pulls.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::remote(anyhow::anyhow!("network unreachable")));
            }
            self.log_entry(format!("pull {branch}"));
            Ok(())
        }

        async fn push(&self, branch: &str) -> Result<()> {
            self.log_entry(format!("push {branch}"));
            Ok(())
        }

        fn supports_locking(&self) -> bool {
            self.lockable
        }

        async fn lock(&self, branch: &str, _ttl: Duration) -> Result<()> {
            self.log_entry(format!("lock {branch}"));
            Ok(())
        }

        async fn unlock(&self, branch: &str) -> Result<()> {
            self.log_entry(format!("unlock {branch}"));
            Ok(())
        }
    }

    struct NoopManager;

    impl RefResolver for NoopManager {
        fn resolve_ref(
            &self,
            _version: &VersionRef,
        ) -> std::result::Result<CommitHash, models::Error> {
            Ok(CommitHash::new([7u8; 20]))
        }
    }

    #[async_trait]
    impl TransactionManager for NoopManager {
        fn resolver(&self) -> &dyn RefResolver {
            self
        }

        async fn init_target(&self, _info: &TxInfo) -> Result<()> {
            Ok(())
        }

        async fn commit(&self, _info: &TxInfo, _request: &CommitRequest) -> Result<CommitHash> {
            Ok(CommitHash::new([9u8; 20]))
        }

        async fn reset_to_clean_version(&self, _info: &TxInfo) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        remote: Arc<MockRemote>,
        client: DistributedClient,
    }

    fn fixture(policy: CachePolicy, lockable: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFilesystem::new(dir.path().to_path_buf()));
        let namespacer =
            Arc::new(FixedNamespacer::new().with_namespaced(GroupKind::new("", "ConfigMap")));
        let finder = Arc::new(FileFinder::new(
            fs,
            namespacer.clone(),
            Arc::new(HiddenPathExcluder),
        ));
        let backend: Arc<dyn Backend> =
            Arc::new(FileBackend::new(finder, FileBackendOptions::default()));
        let inner = TransactionalClient::new(
            Client::new(backend, namespacer),
            Arc::new(NoopManager),
        );
        let remote = Arc::new(MockRemote {
            lockable,
            ..Default::default()
        });
        let client = DistributedClient::new(inner, remote.clone(), policy, "main");
        Fixture {
            _dir: dir,
            remote,
            client,
        }
    }

    fn cm_key() -> ObjectKey {
        ObjectKey::new(GroupKind::new("", "ConfigMap"), Some("prod"), "settings")
    }

    fn main_view() -> FsView {
        FsView::read_only(VersionRef::branch("main"))
    }

    #[tokio::test]
    async fn pc_ec_pulls_before_every_read() {
        let fx = fixture(CachePolicy::pc_ec(), false);
        for _ in 0..2 {
            let _ = fx
                .client
                .get::<Unstructured>(&main_view(), &cm_key())
                .await;
        }
        assert_eq!(
            fx.remote.entries(),
            vec!["pull main".to_string(), "pull main".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pc_el_serves_cached_reads_within_validity() {
        let fx = fixture(CachePolicy::pc_el(Duration::from_secs(3600)), false);
        for _ in 0..3 {
            let _ = fx
                .client
                .get::<Unstructured>(&main_view(), &cm_key())
                .await;
        }
        assert_eq!(fx.remote.entries(), vec!["pull main".to_string()]);

        // Past the validity window, the next read pulls again.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        let _ = fx
            .client
            .get::<Unstructured>(&main_view(), &cm_key())
            .await;
        assert_eq!(fx.remote.entries().len(), 2);
    }

    #[tokio::test]
    async fn immutable_refs_never_pull() {
        let fx = fixture(CachePolicy::pc_ec(), false);
        let view = FsView::read_only(VersionRef::Hash(CommitHash::new([1u8; 20])));
        let _ = fx.client.get::<Unstructured>(&view, &cm_key()).await;
        assert!(fx.remote.entries().is_empty());
    }

    #[tokio::test]
    async fn pc_mode_fails_reads_on_pull_errors() {
        let fx = fixture(CachePolicy::pc_ec(), false);
        fx.remote.fail_pulls.store(1, Ordering::SeqCst);
        let err = fx
            .client
            .get::<Unstructured>(&main_view(), &cm_key())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
    }

    #[tokio::test]
    async fn pa_mode_forwards_errors_and_serves_cached() {
        let (tx, mut errors) = mpsc::channel(8);
        let fx = fixture(CachePolicy::pa_el(Duration::from_secs(3600), tx), false);
        fx.remote.fail_pulls.store(1, Ordering::SeqCst);

        // The read proceeds (and then fails on the empty store, which is
        // NotFound rather than Remote).
        let err = fx
            .client
            .get::<Unstructured>(&main_view(), &cm_key())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // The pull error arrived on the stream.
        let forwarded = errors.recv().await.unwrap();
        assert!(matches!(forwarded, Error::Remote(_)));
    }

    #[tokio::test]
    async fn transactions_run_lock_pull_push_unlock() {
        let fx = fixture(CachePolicy::pc_ec(), true);

        let mut tx = fx
            .client
            .transaction(&VersionRef::branch("main"), TxOptions::default())
            .await
            .unwrap();
        tx.create(
            Unstructured::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings", "namespace": "prod"},
            }))
            .unwrap(),
        );
        tx.commit(CommitRequest::new("dev", "dev@example.com", "add settings"))
            .await
            .unwrap();

        assert_eq!(
            fx.remote.entries(),
            vec![
                "lock main".to_string(),
                "pull main".to_string(),
                "push main".to_string(),
                "unlock main".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resync_loop_pulls_until_cancelled() {
        let fx = fixture(CachePolicy::pc_el(Duration::from_secs(3600)), false);
        let token = CancellationToken::new();
        let handle =
            fx.client
                .start_resync_loop(token.clone(), Duration::from_secs(30), Vec::new());

        tokio::time::sleep(Duration::from_secs(95)).await;
        token.cancel();
        handle.await.unwrap();

        // The first tick fires immediately, then every 30 seconds.
        let pulls = fx.remote.entries().len();
        assert_eq!(pulls, 4);
    }
}
