//! Sync orchestrator.
//!
//! [`Orchestrator::sync`] applies a batch of objects with one operation as
//! a single transaction:
//!
//! 1. validate every object against the state the transaction sees
//! 2. stage the writes and their derived objects
//! 3. recompile every RuleS2S the batch affects, stamping the conditions of
//!    the compiled rules it writes
//! 4. commit and publish the change events
//! 5. for creates and updates only, reconcile conditions of the batch and of
//!    every RuleS2S whose compiled rules changed
//!
//! Any failure before the commit aborts the transaction; nothing is written
//! and no event is emitted. Deletes take a separate pipeline that never
//! touches conditions.

mod delete;
mod mutate;

use netguard_store::{Change, Record, ResourceKey, ResourceStore, ResourceVersion, Snapshot, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::compiler::{CompileDiff, RuleCompiler};
use crate::config::EngineConfig;
use crate::error::{NetguardError, NetguardResult};
use crate::model::{Kind, ObjectRef, Resource, TypedReader, TypedResource};
use crate::notifier::ChangeNotifier;
use crate::reconciler::{ConditionReconciler, ReconcileReport};
use crate::registry::KindRegistry;

use delete::DeletePipeline;
use mutate::MutatePipeline;

/// What a sync does with each object of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Objects must not exist.
    Create,
    /// Objects must exist.
    Update,
    /// Objects are created or replaced.
    Upsert,
    /// Objects are removed, with their cascading dependents.
    Delete,
}

/// The write half of [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Create,
    Update,
    Upsert,
}

impl Operation {
    pub(crate) fn write_mode(self) -> Option<WriteMode> {
        match self {
            Operation::Create => Some(WriteMode::Create),
            Operation::Update => Some(WriteMode::Update),
            Operation::Upsert => Some(WriteMode::Upsert),
            Operation::Delete => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        })
    }
}

/// Result of a committed sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The operation applied.
    pub operation: Operation,
    /// Version of the commit.
    pub version: ResourceVersion,
    /// Every committed change, derived objects included.
    pub changes: Vec<Change<Resource>>,
    /// One diff per recompiled RuleS2S.
    pub compiled: Vec<CompileDiff>,
    /// Conditions written after the commit. Always `None` for deletes, and
    /// for mutate syncs when inline reconciliation is disabled.
    pub reconciled: Option<ReconcileReport>,
}

impl SyncOutcome {
    /// Committed changes to objects of `kind`.
    pub fn changes_of(&self, kind: Kind) -> impl Iterator<Item = &Change<Resource>> {
        self.changes.iter().filter(move |c| c.key.kind == kind.as_str())
    }
}

/// Order in which kinds are applied: referenced kinds before their
/// referrers. Deletes walk it backwards.
fn apply_rank(kind: Kind) -> u8 {
    match kind {
        Kind::Service => 0,
        Kind::AddressGroup => 1,
        Kind::Network => 2,
        Kind::ServiceAlias => 3,
        Kind::AddressGroupBindingPolicy => 4,
        Kind::AddressGroupBinding => 5,
        Kind::NetworkBinding => 6,
        Kind::RuleS2S => 7,
        Kind::AddressGroupPortMapping => 8,
        Kind::IeAgAgRule => 9,
    }
}

fn ensure_user_writable(obj: &Resource) -> NetguardResult<()> {
    let kind = obj.kind();
    if kind.is_user_writable() {
        Ok(())
    } else {
        Err(NetguardError::validation(
            obj.key(),
            format!("{kind} objects are maintained by the control plane"),
        ))
    }
}

/// Applies batches to the store.
///
/// Cloning is not needed to share one orchestrator: every method takes
/// `&self`, and concurrent syncs are serialized by the store's commit-time
/// conflict detection.
pub struct Orchestrator {
    store: Arc<dyn ResourceStore<Resource>>,
    registry: Arc<KindRegistry>,
    compiler: RuleCompiler,
    notifier: Arc<ChangeNotifier>,
    reconciler: Arc<ConditionReconciler>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Creates an orchestrator with every built-in kind registered.
    pub fn new(store: Arc<dyn ResourceStore<Resource>>, config: EngineConfig) -> Self {
        Self::with_registry(store, KindRegistry::standard(), config)
    }

    /// Creates an orchestrator over a custom registry.
    pub fn with_registry(
        store: Arc<dyn ResourceStore<Resource>>,
        registry: KindRegistry,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let notifier = Arc::new(ChangeNotifier::new(Arc::clone(&store), config.watch_history));
        let reconciler = Arc::new(ConditionReconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&notifier),
        ));
        Self {
            compiler: RuleCompiler::new(&config),
            store,
            registry,
            notifier,
            reconciler,
            config,
        }
    }

    /// Applies `batch` atomically.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if any object fails validation, a
    /// reference does not resolve, a delete is blocked by a referrer, a
    /// rule fails to compile, or the commit conflicts.
    pub fn sync(&self, batch: Vec<Resource>, operation: Operation) -> NetguardResult<SyncOutcome> {
        let size = batch.len();
        let mut txn = self.store.begin()?;
        let staged = match operation.write_mode() {
            Some(mode) => self.mutate().stage(&mut txn, batch, mode),
            None => self.delete().stage(&mut txn, batch),
        };
        let staged = match staged {
            Ok(staged) => staged,
            Err(err) => {
                self.abort(&mut txn);
                return Err(err);
            }
        };

        let commit = match self.notifier.commit_and_publish(&mut txn) {
            Ok(commit) => commit,
            Err(err) => {
                self.abort(&mut txn);
                return Err(err);
            }
        };
        info!(
            %operation,
            objects = size,
            version = %commit.version,
            changes = commit.changes.len(),
            "sync committed"
        );

        let reconciled = match operation.write_mode() {
            Some(_) => self.after_mutate(staged.touched, &staged.compiled),
            None => None,
        };

        Ok(SyncOutcome {
            operation,
            version: commit.version,
            changes: commit.changes,
            compiled: staged.compiled,
            reconciled,
        })
    }

    /// Runs every check [`sync`](Self::sync) runs, then discards the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns the error `sync` would have returned before committing.
    pub fn validate(&self, batch: Vec<Resource>, operation: Operation) -> NetguardResult<()> {
        let mut txn = self.store.begin()?;
        let result = match operation.write_mode() {
            Some(mode) => self.mutate().stage(&mut txn, batch, mode),
            None => self.delete().stage(&mut txn, batch),
        };
        self.abort(&mut txn);
        result.map(|_| ())
    }

    /// Like [`sync`](Self::sync), re-running the batch after commit
    /// conflicts as the configured [`RetryConfig`](crate::RetryConfig)
    /// allows.
    ///
    /// # Errors
    ///
    /// Returns the first error that is not a commit conflict, or the last
    /// conflict once attempts or the pause budget run out.
    pub fn sync_with_retry(
        &self,
        batch: Vec<Resource>,
        operation: Operation,
    ) -> NetguardResult<SyncOutcome> {
        let retry = &self.config.retry;
        let mut attempts = 0;
        let mut slept = Duration::ZERO;
        loop {
            attempts += 1;
            match self.sync(batch.clone(), operation) {
                Err(err) if retry.should_retry(&err, attempts, slept) => {
                    let delay = retry.backoff(attempts);
                    warn!(%operation, attempts, ?delay, error = %err, "sync conflicted, retrying");
                    std::thread::sleep(delay);
                    slept += delay;
                }
                result => return result,
            }
        }
    }

    /// Retries reconciliation of objects whose conditions failed to persist.
    pub fn reconcile_pending(&self) -> ReconcileReport {
        self.reconciler.reconcile_pending()
    }

    /// Recomputes conditions for every stored object.
    pub fn resync_all(&self) -> ReconcileReport {
        self.reconciler.resync_all()
    }

    /// Reads one object from the latest committed state.
    ///
    /// # Errors
    ///
    /// Fails only if the store read fails.
    pub fn get<T: TypedResource>(&self, reference: &ObjectRef) -> NetguardResult<Option<T>> {
        Ok(self.store.snapshot().get_as::<T>(reference)?)
    }

    /// Lists objects of one kind from the latest committed state.
    ///
    /// # Errors
    ///
    /// Fails only if the store read fails.
    pub fn list<T: TypedResource>(&self, namespace: Option<&str>) -> NetguardResult<Vec<T>> {
        Ok(self.store.snapshot().list_as::<T>(namespace)?)
    }

    /// A consistent view of the latest committed state.
    pub fn snapshot(&self) -> Snapshot<Resource> {
        self.store.snapshot()
    }

    /// The change notifier every commit goes through.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// The condition reconciler.
    pub fn reconciler(&self) -> &Arc<ConditionReconciler> {
        &self.reconciler
    }

    /// The kind registry.
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ResourceStore<Resource>> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn mutate(&self) -> MutatePipeline<'_> {
        MutatePipeline::new(&self.registry, &self.compiler)
    }

    fn delete(&self) -> DeletePipeline<'_> {
        DeletePipeline::new(&self.registry, &self.compiler)
    }

    fn after_mutate(
        &self,
        touched: Vec<ResourceKey>,
        compiled: &[CompileDiff],
    ) -> Option<ReconcileReport> {
        let mut keys: Vec<ResourceKey> = touched;
        // Compiled rules got their conditions in the primary transaction.
        for diff in compiled.iter().filter(|d| !d.is_noop()) {
            keys.push(diff.rule.key(Kind::RuleS2S));
        }
        keys.sort();
        keys.dedup();

        if self.config.reconcile_after_sync {
            Some(self.reconciler.reconcile(keys))
        } else {
            self.reconciler.enqueue(keys);
            None
        }
    }

    fn abort(&self, txn: &mut Transaction<Resource>) {
        if txn.is_active() {
            if let Err(err) = self.store.abort(txn) {
                warn!(error = %err, "failed to abort transaction");
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("version", &self.store.current_version())
            .field("kinds", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What a pipeline staged before the commit.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    /// Keys of the batch objects as written.
    pub touched: Vec<ResourceKey>,
    /// Recompile diffs.
    pub compiled: Vec<CompileDiff>,
}
