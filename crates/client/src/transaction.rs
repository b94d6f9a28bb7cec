use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use models::{
    CommitHash, CommitRequest, GroupKind, MutableTarget, Object, ObjectKey, RefResolver,
    VersionRef,
};
use storage::FsView;
use uuid::Uuid;

use crate::hooks::{CommitHookChain, TransactionHookChain, TxInfo};
use crate::{Client, BranchLockMap, Error, ListOptions, Patch, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOptions {
    /// The transaction is aborted by a watchdog once this elapses.
    pub timeout: Duration,
    /// Extra attempts for the commit step on transient backend errors.
    pub retries: u32,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 0,
        }
    }
}

/// The repository-side operations a transaction needs: workspace creation,
/// committing, and restoring the pre-transaction state.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    fn resolver(&self) -> &dyn RefResolver;

    /// Creates the destination branch and private workspace for `info`.
    async fn init_target(&self, info: &TxInfo) -> Result<()>;

    /// Stages everything in the workspace and creates exactly one commit on
    /// the destination branch.
    async fn commit(&self, info: &TxInfo, request: &CommitRequest) -> Result<CommitHash>;

    /// Restores the working tree to the transaction's base and discards the
    /// private workspace. Must tolerate a target whose init failed midway.
    async fn reset_to_clean_version(&self, info: &TxInfo) -> Result<()>;
}

struct Inner {
    client: Client,
    manager: Arc<dyn TransactionManager>,
    locks: BranchLockMap,
    commit_hooks: CommitHookChain,
    tx_hooks: TransactionHookChain,
    active_targets: StdMutex<HashSet<Uuid>>,
}

/// Layers branch-scoped locking and transactions over a [`Client`]: reads
/// against a branch take the branch lock's read side, transactions hold the
/// write side, and reads against immutable refs skip locking entirely.
#[derive(Clone)]
pub struct TransactionalClient {
    inner: Arc<Inner>,
}

impl TransactionalClient {
    pub fn new(client: Client, manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                manager,
                locks: BranchLockMap::new(),
                commit_hooks: CommitHookChain::default(),
                tx_hooks: TransactionHookChain::default(),
                active_targets: StdMutex::new(HashSet::new()),
            }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn manager(&self) -> &Arc<dyn TransactionManager> {
        &self.inner.manager
    }

    pub fn commit_hooks(&self) -> &CommitHookChain {
        &self.inner.commit_hooks
    }

    pub fn transaction_hooks(&self) -> &TransactionHookChain {
        &self.inner.tx_hooks
    }

    async fn read_guard(
        &self,
        version: &VersionRef,
    ) -> Option<tokio::sync::OwnedRwLockReadGuard<()>> {
        match version {
            VersionRef::Branch { name, before: None } => {
                Some(self.inner.locks.lock_for(name).read_owned().await)
            }
            _ => None,
        }
    }

    pub async fn get<O: Object>(&self, view: &FsView, key: &ObjectKey) -> Result<O> {
        let _guard = self.read_guard(&view.version).await;
        self.inner.client.get(view, key).await
    }

    pub async fn list<O: Object>(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        options: &ListOptions,
    ) -> Result<Vec<O>> {
        let _guard = self.read_guard(&view.version).await;
        self.inner.client.list(view, group_kind, options).await
    }

    /// A transaction writing to the branch `base` itself (head == base).
    pub async fn transaction(&self, base: &VersionRef, options: TxOptions) -> Result<Transaction> {
        if !base.is_writable() {
            return Err(Error::VersionRefImmutable(base.clone()));
        }
        let head = base.branch_name().expect("writable refs are branches");
        self.begin(base.clone(), head.to_string(), options).await
    }

    /// A transaction creating `head` from `base`. A head name ending in `-`
    /// gets a random 8-hex suffix.
    pub async fn branch_transaction(
        &self,
        base: &VersionRef,
        head: &str,
        options: TxOptions,
    ) -> Result<Transaction> {
        let head = if head.ends_with('-') {
            format!("{head}{:08x}", rand::random::<u32>())
        } else {
            head.to_string()
        };
        self.begin(base.clone(), head, options).await
    }

    async fn begin(&self, base: VersionRef, head: String, options: TxOptions) -> Result<Transaction> {
        // The write side drains concurrent readers and serializes
        // transactions per branch.
        let lock = self.inner.locks.lock_for(&head).write_owned().await;

        let base_commit = base.resolve(self.inner.manager.resolver())?;
        let target = MutableTarget::new(head, base_commit);
        {
            let mut active = self
                .inner
                .active_targets
                .lock()
                .expect("target registry poisoned");
            if !active.insert(target.uuid) {
                return Err(Error::OngoingTransaction(target.to_string()));
            }
        }

        let info = TxInfo {
            base,
            target,
            options,
        };
        tracing::debug!(tx = %info.target, base = %info.base, "starting transaction");

        let shared = Arc::new(TxShared {
            info,
            inner: self.inner.clone(),
            active: AtomicBool::new(true),
            deadline_fired: AtomicBool::new(false),
            lock: StdMutex::new(Some(lock)),
            watchdog: StdMutex::new(None),
        });

        if let Err(err) = self.init_steps(&shared).await {
            return Err(abort_with(&shared, err).await);
        }

        let watchdog = tokio::spawn({
            let shared = shared.clone();
            async move {
                tokio::time::sleep(shared.info.options.timeout).await;
                shared.deadline_fired.store(true, Ordering::SeqCst);
                tracing::warn!(tx = %shared.info.target, "transaction deadline exceeded");
                let _ = cleanup(&shared).await;
            }
        });
        *shared.watchdog.lock().expect("watchdog slot poisoned") = Some(watchdog);

        Ok(Transaction {
            shared,
            ops: Vec::new(),
        })
    }

    async fn init_steps(&self, shared: &Arc<TxShared>) -> Result<()> {
        self.inner.manager.init_target(&shared.info).await?;
        self.inner.client.backend().register_version(
            &VersionRef::branch(shared.info.target.dest_branch.clone()),
            Some(&shared.info.base),
        );
        self.inner.tx_hooks.run_pre(&shared.info).await?;
        Ok(())
    }
}

struct TxShared {
    info: TxInfo,
    inner: Arc<Inner>,
    active: AtomicBool,
    deadline_fired: AtomicBool,
    lock: StdMutex<Option<tokio::sync::OwnedRwLockWriteGuard<()>>>,
    watchdog: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Restores the pre-transaction state. Runs its steps exactly once, gated
/// by a compare-and-swap on the active flag; later callers get nothing to
/// do and no errors.
async fn cleanup(shared: &TxShared) -> Vec<Error> {
    if shared
        .active
        .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Vec::new();
    }

    let mut errors = Vec::new();
    if let Err(err) = shared
        .inner
        .manager
        .reset_to_clean_version(&shared.info)
        .await
    {
        errors.push(err);
    }
    if let Err(err) = shared.inner.tx_hooks.run_post(&shared.info).await {
        errors.push(err);
    }

    shared
        .inner
        .active_targets
        .lock()
        .expect("target registry poisoned")
        .remove(&shared.info.target.uuid);
    if let Some(handle) = shared
        .watchdog
        .lock()
        .expect("watchdog slot poisoned")
        .take()
    {
        handle.abort();
    }
    drop(shared.lock.lock().expect("lock slot poisoned").take());

    tracing::debug!(tx = %shared.info.target, errors = errors.len(), "transaction cleaned up");
    errors
}

/// Aborts with `cause`, aggregating any cleanup errors alongside it.
async fn abort_with(shared: &TxShared, cause: Error) -> Error {
    let cleanup_errors = cleanup(shared).await;
    if cleanup_errors.is_empty() {
        cause
    } else {
        Error::Aborted {
            cause: Box::new(cause),
            cleanup: cleanup_errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// The context a deferred operation runs in: the plain client addressed at
/// the transaction's mutable workspace.
#[derive(Clone)]
pub struct TxContext {
    pub client: Client,
    pub view: FsView,
}

type TxOp = Box<dyn FnOnce(TxContext) -> BoxFuture<'static, Result<()>> + Send>;

/// The value a deferred read produces, available after `commit`.
pub struct TxReceipt<T>(Arc<StdMutex<Option<T>>>);

impl<T> Clone for TxReceipt<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> TxReceipt<T> {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(None)))
    }

    fn set(&self, value: T) {
        *self.0.lock().expect("receipt poisoned") = Some(value);
    }

    /// The result, once the operation has run.
    pub fn take(&self) -> Option<T> {
        self.0.lock().expect("receipt poisoned").take()
    }
}

/// A branch-scoped transaction. Operations are deferred: they queue on the
/// transaction and run, in order, at [`commit`]. Dropping an uncommitted
/// transaction aborts it in the background.
///
/// [`commit`]: Transaction::commit
pub struct Transaction {
    shared: Arc<TxShared>,
    ops: Vec<TxOp>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("info", &self.shared.info)
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn info(&self) -> &TxInfo {
        &self.shared.info
    }

    /// The branch this transaction writes.
    pub fn head(&self) -> &str {
        &self.shared.info.target.dest_branch
    }

    fn push(&mut self, op: TxOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn create<O: Object>(&mut self, object: O) -> &mut Self {
        self.push(Box::new(move |ctx| {
            Box::pin(async move { ctx.client.create(&ctx.view, &object).await })
        }))
    }

    pub fn update<O: Object>(&mut self, object: O) -> &mut Self {
        self.push(Box::new(move |ctx| {
            Box::pin(async move { ctx.client.update(&ctx.view, &object).await })
        }))
    }

    pub fn delete(&mut self, key: ObjectKey) -> &mut Self {
        self.push(Box::new(move |ctx| {
            Box::pin(async move { ctx.client.delete(&ctx.view, &key).await })
        }))
    }

    pub fn get<O: Object>(&mut self, key: ObjectKey) -> TxReceipt<O> {
        let receipt = TxReceipt::new();
        let out = receipt.clone();
        self.push(Box::new(move |ctx| {
            Box::pin(async move {
                let object = ctx.client.get::<O>(&ctx.view, &key).await?;
                out.set(object);
                Ok(())
            })
        }));
        receipt
    }

    pub fn list<O: Object>(&mut self, group_kind: GroupKind, options: ListOptions) -> TxReceipt<Vec<O>> {
        let receipt = TxReceipt::new();
        let out = receipt.clone();
        self.push(Box::new(move |ctx| {
            Box::pin(async move {
                let objects = ctx.client.list::<O>(&ctx.view, &group_kind, &options).await?;
                out.set(objects);
                Ok(())
            })
        }));
        receipt
    }

    pub fn patch<O: Object>(&mut self, key: ObjectKey, patch: Patch) -> TxReceipt<O> {
        let receipt = TxReceipt::new();
        let out = receipt.clone();
        self.push(Box::new(move |ctx| {
            Box::pin(async move {
                let object = ctx.client.patch::<O>(&ctx.view, &key, &patch).await?;
                out.set(object);
                Ok(())
            })
        }));
        receipt
    }

    /// Queues an arbitrary operation against the transaction's workspace.
    pub fn custom<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(TxContext) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.push(Box::new(f))
    }

    fn check_active(&self) -> Result<()> {
        if self.shared.active.load(Ordering::SeqCst) {
            Ok(())
        } else if self.shared.deadline_fired.load(Ordering::SeqCst) {
            Err(Error::DeadlineExceeded)
        } else {
            Err(Error::Inactive)
        }
    }

    /// Runs the queued operations in order, then the pre-commit chain, the
    /// manager commit, and the post-commit chain. Any failure aborts the
    /// transaction; cleanup always runs exactly once.
    pub async fn commit(mut self, request: CommitRequest) -> Result<CommitHash> {
        self.check_active()?;
        if let Err(err) = request.validate() {
            return Err(abort_with(&self.shared, err.into()).await);
        }

        let info = self.shared.info.clone();
        let ctx = TxContext {
            client: self.shared.inner.client.clone(),
            view: FsView::mutable(info.target.clone()),
        };

        let ops = std::mem::take(&mut self.ops);
        for op in ops {
            self.check_active()?;
            if let Err(err) = op(ctx.clone()).await {
                return Err(abort_with(&self.shared, err).await);
            }
        }

        self.check_active()?;
        if let Err(err) = self
            .shared
            .inner
            .commit_hooks
            .run_pre(&info, &request)
            .await
        {
            return Err(abort_with(&self.shared, err).await);
        }

        let mut attempt = 0;
        let commit = loop {
            match self.shared.inner.manager.commit(&info, &request).await {
                Ok(commit) => break commit,
                Err(err) if attempt < info.options.retries => {
                    attempt += 1;
                    tracing::warn!(
                        tx = %info.target,
                        attempt,
                        error = %err,
                        "commit failed; retrying",
                    );
                }
                Err(err) => return Err(abort_with(&self.shared, err).await),
            }
        };

        if let Err(err) = self
            .shared
            .inner
            .commit_hooks
            .run_post(&info, &request, &commit)
            .await
        {
            return Err(abort_with(&self.shared, err).await);
        }

        let cleanup_errors = cleanup(&self.shared).await;
        if let Some(first) = cleanup_errors.into_iter().next() {
            tracing::error!(tx = %info.target, commit = %commit, "post-commit cleanup failed");
            return Err(first);
        }
        tracing::info!(tx = %info.target, commit = %commit, "transaction committed");
        Ok(commit)
    }

    /// Abandons the transaction, restoring the pre-transaction state.
    pub async fn abort(self) -> Result<()> {
        match cleanup(&self.shared).await.into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.shared.active.load(Ordering::SeqCst) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let shared = self.shared.clone();
                handle.spawn(async move {
                    let _ = cleanup(&shared).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Backend, FileBackend, FileBackendOptions};
    use async_trait::async_trait;
    use models::{FixedNamespacer, ObjectMeta, Unstructured};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use storage::{FileFinder, HiddenPathExcluder, LocalFilesystem};

    struct MockManager {
        inits: AtomicUsize,
        commits: AtomicUsize,
        resets: AtomicUsize,
        fail_commits: AtomicUsize,
    }

    impl MockManager {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inits: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                fail_commits: AtomicUsize::new(0),
            })
        }
    }

    impl RefResolver for MockManager {
        fn resolve_ref(
            &self,
            _version: &VersionRef,
        ) -> std::result::Result<CommitHash, models::Error> {
            Ok(CommitHash::new([7u8; 20]))
        }
    }

    #[async_trait]
    impl TransactionManager for MockManager {
        fn resolver(&self) -> &dyn RefResolver {
            self
        }

        async fn init_target(&self, _info: &TxInfo) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn commit(&self, _info: &TxInfo, _request: &CommitRequest) -> Result<CommitHash> {
            if self.fail_commits.load(Ordering::SeqCst) > 0 {
                self.fail_commits.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::other(anyhow::anyhow!("transient commit failure")));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(CommitHash::new([9u8; 20]))
        }

        async fn reset_to_clean_version(&self, _info: &TxInfo) -> Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        txc: TransactionalClient,
        manager: Arc<MockManager>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFilesystem::new(dir.path().to_path_buf()));
        let namespacer = Arc::new(
            FixedNamespacer::new().with_namespaced(GroupKind::new("", "ConfigMap")),
        );
        let finder = Arc::new(FileFinder::new(
            fs,
            namespacer.clone(),
            Arc::new(HiddenPathExcluder),
        ));
        let backend: Arc<dyn Backend> =
            Arc::new(FileBackend::new(finder, FileBackendOptions::default()));
        let client = Client::new(backend, namespacer);
        let manager = MockManager::new();
        Fixture {
            _dir: dir,
            txc: TransactionalClient::new(client, manager.clone()),
            manager,
        }
    }

    fn config_map(name: &str) -> Unstructured {
        Unstructured::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "prod"},
            "data": {"k": "v"},
        }))
        .unwrap()
    }

    fn request() -> CommitRequest {
        CommitRequest::new("dev", "dev@example.com", "store config")
    }

    #[tokio::test]
    async fn ops_run_at_commit_not_before() {
        let fx = fixture();
        let main = VersionRef::branch("main");

        let mut tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();
        tx.create(config_map("a"));
        let receipt = tx.get::<Unstructured>(config_map("a").key());

        // Nothing ran yet.
        assert!(receipt.take().is_none());
        assert_eq!(fx.manager.commits.load(Ordering::SeqCst), 0);

        let commit = tx.commit(request()).await.unwrap();
        assert_eq!(commit, CommitHash::new([9u8; 20]));
        assert_eq!(fx.manager.commits.load(Ordering::SeqCst), 1);
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 1);
        assert_eq!(receipt.take().unwrap().name(), "a");
    }

    #[tokio::test]
    async fn failed_op_aborts_and_resets_exactly_once() {
        let fx = fixture();
        let main = VersionRef::branch("main");

        let mut tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();
        // Updating a nonexistent object fails when the op runs.
        tx.update(config_map("missing"));

        let err = tx.commit(request()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(fx.manager.commits.load(Ordering::SeqCst), 0);
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 1);

        // The branch lock is free again.
        let tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();
        tx.abort().await.unwrap();
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn immutable_refs_cannot_open_transactions() {
        let fx = fixture();
        let hash = VersionRef::Hash(CommitHash::new([1u8; 20]));
        let err = fx
            .txc
            .transaction(&hash, TxOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionRefImmutable(_)));
    }

    #[tokio::test]
    async fn branch_transactions_randomize_dash_suffix() {
        let fx = fixture();
        let main = VersionRef::branch("main");
        let tx = fx
            .txc
            .branch_transaction(&main, "feat-", TxOptions::default())
            .await
            .unwrap();
        let head = tx.head().to_string();
        assert!(head.starts_with("feat-"));
        assert_eq!(head.len(), "feat-".len() + 8);
        tx.abort().await.unwrap();
    }

    #[tokio::test]
    async fn transactions_serialize_per_branch() {
        let fx = fixture();
        let main = VersionRef::branch("main");

        let tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();

        // A second transaction on the same branch blocks until cleanup.
        let txc = fx.txc.clone();
        let second = tokio::spawn(async move {
            let tx = txc
                .transaction(&VersionRef::branch("main"), TxOptions::default())
                .await
                .unwrap();
            tx.abort().await.unwrap();
        });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        tx.abort().await.unwrap();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn reads_against_other_branches_do_not_block() {
        let fx = fixture();
        let main = VersionRef::branch("main");
        let tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();

        // A read against an immutable hash takes no lock at all.
        let hash_view = FsView::read_only(VersionRef::Hash(CommitHash::new([1u8; 20])));
        let err = fx
            .txc
            .get::<Unstructured>(&hash_view, &config_map("a").key())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        tx.abort().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_via_watchdog() {
        let fx = fixture();
        let main = VersionRef::branch("main");
        let mut tx = fx
            .txc
            .transaction(
                &main,
                TxOptions {
                    timeout: Duration::from_secs(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tx.create(config_map("late"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 1);

        let err = tx.commit(request()).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        // Cleanup did not run twice.
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commit_retries_transient_failures() {
        let fx = fixture();
        fx.manager.fail_commits.store(1, Ordering::SeqCst);
        let main = VersionRef::branch("main");

        let mut tx = fx
            .txc
            .transaction(
                &main,
                TxOptions {
                    retries: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tx.create(config_map("retry"));
        tx.commit(request()).await.unwrap();
        assert_eq!(fx.manager.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_commit_requests_abort() {
        let fx = fixture();
        let main = VersionRef::branch("main");
        let tx = fx
            .txc
            .transaction(&main, TxOptions::default())
            .await
            .unwrap();
        let err = tx
            .commit(CommitRequest::new("dev", "dev@example.com", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Model(models::Error::MissingRequestField("title"))
        ));
        assert_eq!(fx.manager.resets.load(Ordering::SeqCst), 1);
    }
}
