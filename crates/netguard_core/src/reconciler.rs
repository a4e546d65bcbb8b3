//! Condition reconciler.
//!
//! Computes `Validated`, `Synced` and `Ready` for committed objects and
//! persists them in a transaction of its own. It runs strictly after the
//! commit of a create or update; the delete pipeline holds no reference to
//! it.
//!
//! Failures are logged and queued. [`ConditionReconciler::reconcile_pending`]
//! retries the queue and [`ConditionReconciler::resync_all`] recomputes
//! every object, so a crash between commit and reconciliation is repaired
//! by the next pass.

use chrono::{DateTime, Utc};
use netguard_store::{Reader, ResourceKey, ResourceStore};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{NetguardError, NetguardResult};
use crate::model::{Condition, ConditionStatus, ConditionType, Resource};
use crate::notifier::ChangeNotifier;
use crate::registry::{KindEntry, KindRegistry, Readiness};

/// What reconciling one object did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Conditions were written.
    Updated,
    /// Conditions were already current.
    Unchanged,
    /// The object no longer exists; nothing was written.
    Gone,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects whose conditions were written.
    pub updated: Vec<ResourceKey>,
    /// Objects already current.
    pub unchanged: Vec<ResourceKey>,
    /// Objects that disappeared before they were reconciled.
    pub gone: Vec<ResourceKey>,
    /// Objects that failed and were queued for the next pass.
    pub failed: Vec<ResourceKey>,
}

impl ReconcileReport {
    /// Number of objects visited.
    #[must_use]
    pub fn total(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.gone.len() + self.failed.len()
    }
}

/// Computes the conditions `obj` should carry, given the state visible to
/// `reader`. Transition times are `now`; [`merge_conditions`] carries older
/// ones forward.
pub fn desired_conditions(
    entry: &KindEntry,
    reader: &dyn Reader<Resource>,
    obj: &Resource,
    now: DateTime<Utc>,
) -> NetguardResult<Vec<Condition>> {
    let generation = obj.meta().generation;
    let condition = |condition_type, status, reason: &str, message: String| Condition {
        condition_type,
        status,
        reason: reason.to_string(),
        message,
        last_transition_time: now,
        observed_generation: generation,
    };

    let validation = match entry.validate(reader, Some(obj), obj) {
        Ok(()) => Ok(()),
        Err(
            err @ (NetguardError::Validation { .. }
            | NetguardError::Reference { .. }
            | NetguardError::Dependency { .. }),
        ) => Err(err.to_string()),
        Err(other) => return Err(other),
    };

    let validated = match &validation {
        Ok(()) => condition(
            ConditionType::Validated,
            ConditionStatus::True,
            "ValidationPassed",
            String::new(),
        ),
        Err(message) => condition(
            ConditionType::Validated,
            ConditionStatus::False,
            "ValidationFailed",
            message.clone(),
        ),
    };

    let synced = condition(
        ConditionType::Synced,
        ConditionStatus::True,
        "Committed",
        String::new(),
    );

    let ready = match validation {
        Err(_) => condition(
            ConditionType::Ready,
            ConditionStatus::False,
            "ValidationFailed",
            "object failed validation".to_string(),
        ),
        Ok(()) => match entry.readiness(reader, obj)? {
            Readiness::Ready => condition(
                ConditionType::Ready,
                ConditionStatus::True,
                "Ready",
                String::new(),
            ),
            Readiness::NotReady { reason, message } => {
                condition(ConditionType::Ready, ConditionStatus::False, reason, message)
            }
        },
    };

    Ok(vec![validated, synced, ready])
}

/// Keeps the transition time of every condition whose status did not change.
#[must_use]
pub fn merge_conditions(existing: &[Condition], desired: Vec<Condition>) -> Vec<Condition> {
    desired
        .into_iter()
        .map(|mut next| {
            if let Some(prev) = existing
                .iter()
                .find(|c| c.condition_type == next.condition_type)
            {
                if prev.status == next.status {
                    next.last_transition_time = prev.last_transition_time;
                }
            }
            next
        })
        .collect()
}

fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_state(y))
}

/// Persists status conditions after commit.
pub struct ConditionReconciler {
    store: Arc<dyn ResourceStore<Resource>>,
    registry: Arc<KindRegistry>,
    notifier: Arc<ChangeNotifier>,
    pending: Mutex<BTreeSet<ResourceKey>>,
}

impl ConditionReconciler {
    /// Creates a reconciler. Writes go through `notifier` so watchers see
    /// condition changes.
    pub fn new(
        store: Arc<dyn ResourceStore<Resource>>,
        registry: Arc<KindRegistry>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Reconciles one object in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`NetguardError::Reconcile`] if conditions could not be
    /// computed or persisted.
    pub fn reconcile_one(&self, key: &ResourceKey) -> NetguardResult<ReconcileOutcome> {
        self.try_reconcile(key)
            .map_err(|err| NetguardError::reconcile(key, err.to_string()))
    }

    fn try_reconcile(&self, key: &ResourceKey) -> NetguardResult<ReconcileOutcome> {
        let mut txn = self.store.begin()?;
        let Some(current) = txn.get(key)? else {
            self.store.abort(&mut txn)?;
            return Ok(ReconcileOutcome::Gone);
        };

        let entry = self.registry.entry(&current)?;
        let desired = desired_conditions(entry, &txn, &current, Utc::now())?;
        let meta = current.meta();
        let merged = merge_conditions(&meta.conditions, desired);

        if same_conditions(&meta.conditions, &merged) && meta.observed_generation == meta.generation {
            self.store.abort(&mut txn)?;
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mut next = current.clone();
        let generation = next.meta().generation;
        let next_meta = next.meta_mut();
        next_meta.conditions = merged;
        next_meta.observed_generation = generation;
        txn.update(next)?;
        if let Err(err) = self.notifier.commit_and_publish(&mut txn) {
            if txn.is_active() {
                self.store.abort(&mut txn)?;
            }
            return Err(err);
        }
        debug!(object = %key, "conditions updated");
        Ok(ReconcileOutcome::Updated)
    }

    /// Reconciles every key, queueing failures for the next pass.
    pub fn reconcile<I>(&self, keys: I) -> ReconcileReport
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        let mut report = ReconcileReport::default();
        for key in keys {
            match self.reconcile_one(&key) {
                Ok(outcome) => {
                    self.pending.lock().remove(&key);
                    match outcome {
                        ReconcileOutcome::Updated => report.updated.push(key),
                        ReconcileOutcome::Unchanged => report.unchanged.push(key),
                        ReconcileOutcome::Gone => report.gone.push(key),
                    }
                }
                Err(err) => {
                    warn!(object = %key, error = %err, "reconcile failed, queued for retry");
                    self.pending.lock().insert(key.clone());
                    report.failed.push(key);
                }
            }
        }
        report
    }

    /// Queues keys for the next pass without reconciling now.
    pub fn enqueue<I>(&self, keys: I)
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        self.pending.lock().extend(keys);
    }

    /// Keys waiting for a retry.
    pub fn pending(&self) -> Vec<ResourceKey> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Retries every queued key.
    pub fn reconcile_pending(&self) -> ReconcileReport {
        let queued: Vec<ResourceKey> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect();
        self.reconcile(queued)
    }

    /// Recomputes conditions for every stored object.
    pub fn resync_all(&self) -> ReconcileReport {
        let keys: Vec<ResourceKey> = self
            .store
            .snapshot()
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        self.reconcile(keys)
    }
}

impl std::fmt::Debug for ConditionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionReconciler")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectRef, Service, ServiceAlias};
    use netguard_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore<Resource>>,
        reconciler: ConditionReconciler,
    }

    fn fixture(objects: Vec<Resource>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut txn = store.begin().unwrap();
        for mut obj in objects {
            obj.meta_mut().generation = 1;
            txn.create(obj).unwrap();
        }
        store.commit(&mut txn).unwrap();
        let notifier = Arc::new(ChangeNotifier::new(store.clone(), 100));
        let reconciler = ConditionReconciler::new(
            store.clone(),
            Arc::new(KindRegistry::standard()),
            notifier,
        );
        Fixture { store, reconciler }
    }

    fn stored(store: &MemoryStore<Resource>, key: &ResourceKey) -> Resource {
        store.snapshot().get(key).unwrap().unwrap()
    }

    #[test]
    fn ready_object_gets_all_true() {
        let f = fixture(vec![
            Service::new("ns", "web").into(),
            ServiceAlias::new("ns", "web", ObjectRef::new("", "web")).into(),
        ]);
        let key = ResourceKey::new("ServiceAlias", "ns", "web");
        assert_eq!(f.reconciler.reconcile_one(&key).unwrap(), ReconcileOutcome::Updated);

        let obj = stored(&f.store, &key);
        for t in ConditionType::ALL {
            assert!(obj.meta().is_condition_true(t), "{t:?}");
        }
        assert_eq!(obj.meta().observed_generation, 1);
    }

    #[test]
    fn second_pass_is_a_noop() {
        let f = fixture(vec![Service::new("ns", "web").into()]);
        let key = ResourceKey::new("Service", "ns", "web");
        f.reconciler.reconcile_one(&key).unwrap();
        let first = stored(&f.store, &key);

        assert_eq!(f.reconciler.reconcile_one(&key).unwrap(), ReconcileOutcome::Unchanged);
        assert_eq!(stored(&f.store, &key), first);
    }

    #[test]
    fn dangling_reference_is_not_validated() {
        let f = fixture(vec![
            ServiceAlias::new("ns", "orphan", ObjectRef::new("", "missing")).into(),
        ]);
        let key = ResourceKey::new("ServiceAlias", "ns", "orphan");
        f.reconciler.reconcile_one(&key).unwrap();

        let obj = stored(&f.store, &key);
        let validated = obj.meta().condition(ConditionType::Validated).unwrap();
        assert_eq!(validated.status, ConditionStatus::False);
        assert!(obj.meta().is_condition_true(ConditionType::Synced));
        assert!(!obj.meta().is_condition_true(ConditionType::Ready));
    }

    #[test]
    fn transition_time_survives_unchanged_status() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let existing = vec![Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::True,
            reason: "Ready".into(),
            message: String::new(),
            last_transition_time: earlier,
            observed_generation: 1,
        }];
        let desired = vec![
            Condition {
                last_transition_time: Utc::now(),
                ..existing[0].clone()
            },
            Condition {
                condition_type: ConditionType::Synced,
                last_transition_time: Utc::now(),
                ..existing[0].clone()
            },
        ];
        let merged = merge_conditions(&existing, desired);
        assert_eq!(merged[0].last_transition_time, earlier);
        assert_ne!(merged[1].last_transition_time, earlier);
    }

    #[test]
    fn missing_objects_are_gone_and_pending_drains() {
        let f = fixture(vec![]);
        let key = ResourceKey::new("Service", "ns", "ghost");
        f.reconciler.enqueue([key.clone()]);
        assert_eq!(f.reconciler.pending(), vec![key.clone()]);

        let report = f.reconciler.reconcile_pending();
        assert_eq!(report.gone, vec![key]);
        assert!(f.reconciler.pending().is_empty());
    }

    #[test]
    fn resync_visits_every_object() {
        let f = fixture(vec![
            Service::new("ns", "a").into(),
            Service::new("ns", "b").into(),
        ]);
        let report = f.reconciler.resync_all();
        assert_eq!(report.updated.len(), 2);
        let again = f.reconciler.resync_all();
        assert_eq!(again.unchanged.len(), 2);
    }
}
