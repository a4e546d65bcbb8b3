//! In-memory MVCC store.

use crate::backend::{Change, ChangeType, CommitOutcome, ResourceStore};
use crate::error::{StoreError, StoreResult};
use crate::reader::Snapshot;
use crate::record::Record;
use crate::transaction::{PendingWrite, Transaction};
use crate::types::{ResourceKey, ResourceVersion, TransactionId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Committed state of the store.
struct Committed<R> {
    /// Latest committed records, shared with outstanding snapshots.
    data: Arc<BTreeMap<ResourceKey, R>>,
    /// Latest committed sequence.
    version: ResourceVersion,
    /// Last sequence that touched each kind, for scan validation.
    kind_versions: HashMap<&'static str, ResourceVersion>,
}

/// An in-memory resource store with snapshot isolation.
///
/// Each commit builds a new map from the previous one and swaps it in
/// under a short write lock, so snapshots taken earlier keep seeing their
/// own version. Concurrent transactions are not serialized by a lock for
/// their lifetime: conflicts are detected at commit by comparing the
/// transaction's read set against the versions committed since its
/// snapshot (first committer wins).
///
/// # Example
///
/// ```rust,ignore
/// use netguard_store::{MemoryStore, ResourceStore};
///
/// let store = MemoryStore::new();
/// let mut txn = store.begin()?;
/// txn.create(record)?;
/// let outcome = store.commit(&mut txn)?;
/// ```
pub struct MemoryStore<R> {
    state: RwLock<Committed<R>>,
    next_txid: AtomicU64,
}

impl<R: Record> MemoryStore<R> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Committed {
                data: Arc::new(BTreeMap::new()),
                version: ResourceVersion::UNSET,
                kind_versions: HashMap::new(),
            }),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the first thing the transaction observed that changed since
    /// its snapshot.
    fn find_conflict(
        state: &Committed<R>,
        txn: &Transaction<R>,
    ) -> Option<ResourceKey> {
        let snapshot = txn.snapshot().version();
        let reads = txn.read_set();

        for (key, observed) in &reads.keys {
            let current = state.data.get(key).map(Record::resource_version);
            if current != *observed {
                return Some(key.clone());
            }
        }

        reads.kinds.iter().find_map(|kind| {
            let touched = state
                .kind_versions
                .get(kind)
                .copied()
                .unwrap_or(ResourceVersion::UNSET);
            (touched > snapshot).then(|| ResourceKey::new(*kind, "", ""))
        })
    }
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> ResourceStore<R> for MemoryStore<R> {
    fn begin(&self) -> StoreResult<Transaction<R>> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.snapshot();
        trace!(%txid, snapshot = %snapshot.version(), "begin transaction");
        Ok(Transaction::new(txid, snapshot))
    }

    fn snapshot(&self) -> Snapshot<R> {
        let state = self.state.read();
        Snapshot::new(Arc::clone(&state.data), state.version)
    }

    fn commit(&self, txn: &mut Transaction<R>) -> StoreResult<CommitOutcome<R>> {
        if !txn.is_active() {
            return Err(StoreError::invalid_operation("transaction not active"));
        }

        if txn.write_count() == 0 {
            let version = txn.snapshot().version();
            txn.mark_committed();
            return Ok(CommitOutcome {
                version,
                changes: Vec::new(),
            });
        }

        let mut state = self.state.write();

        if let Some(key) = Self::find_conflict(&state, txn) {
            let snapshot = txn.snapshot().version();
            debug!(txid = %txn.id(), %key, %snapshot, "commit conflict");
            txn.mark_aborted();
            return Err(StoreError::CommitConflict { key, snapshot });
        }

        let sequence = state.version.next();
        let mut data = (*state.data).clone();
        let mut changes = Vec::with_capacity(txn.write_count());

        for (key, write) in txn.take_writes() {
            state.kind_versions.insert(key.kind, sequence);
            match write {
                PendingWrite::Put(mut record) => {
                    record.set_resource_version(sequence);
                    let change_type = if data.contains_key(&key) {
                        ChangeType::Updated
                    } else {
                        ChangeType::Created
                    };
                    data.insert(key.clone(), record.clone());
                    changes.push(Change {
                        key,
                        change_type,
                        version: sequence,
                        record,
                    });
                }
                PendingWrite::Delete => {
                    if let Some(mut previous) = data.remove(&key) {
                        previous.set_resource_version(sequence);
                        changes.push(Change {
                            key,
                            change_type: ChangeType::Deleted,
                            version: sequence,
                            record: previous,
                        });
                    }
                }
            }
        }

        state.data = Arc::new(data);
        state.version = sequence;
        drop(state);

        txn.mark_committed();
        debug!(txid = %txn.id(), version = %sequence, changes = changes.len(), "committed");

        Ok(CommitOutcome {
            version: sequence,
            changes,
        })
    }

    fn abort(&self, txn: &mut Transaction<R>) -> StoreResult<()> {
        if !txn.is_active() {
            return Err(StoreError::invalid_operation("transaction not active"));
        }
        trace!(txid = %txn.id(), "abort transaction");
        txn.mark_aborted();
        Ok(())
    }

    fn current_version(&self) -> ResourceVersion {
        self.state.read().version
    }
}

impl<R> std::fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryStore")
            .field("version", &state.version)
            .field("records", &state.data.len())
            .finish_non_exhaustive()
    }
}
