//! Resource store contract.

use crate::error::StoreResult;
use crate::reader::Snapshot;
use crate::record::Record;
use crate::transaction::Transaction;
use crate::types::{ResourceKey, ResourceVersion};

/// What a committed write did to one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The identity did not exist before the commit.
    Created,
    /// The identity existed and was replaced.
    Updated,
    /// The identity was removed.
    Deleted,
}

/// One committed change, as reported by [`ResourceStore::commit`].
#[derive(Debug, Clone)]
pub struct Change<R> {
    /// Identity that changed.
    pub key: ResourceKey,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Version of the commit that made the change.
    pub version: ResourceVersion,
    /// The record as written (for deletes, the last committed state).
    pub record: R,
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome<R> {
    /// Commit sequence. Equal to the snapshot version for empty commits.
    pub version: ResourceVersion,
    /// Every change applied, in key order.
    pub changes: Vec<Change<R>>,
}

impl<R> CommitOutcome<R> {
    /// Returns true if the commit wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A transactional store of records keyed by `(kind, namespace, name)`.
///
/// # Invariants
///
/// - `commit` is all-or-nothing across every kind the transaction touched
/// - a reader never observes part of a commit
/// - a committed record's version is the commit's sequence, so versions
///   increase monotonically per identity
/// - a transaction whose reads or write targets were changed by another
///   commit after its snapshot fails with a retryable conflict
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - copy-on-write in-memory backend
pub trait ResourceStore<R: Record>: Send + Sync {
    /// Begins a writer transaction over the latest committed snapshot.
    fn begin(&self) -> StoreResult<Transaction<R>>;

    /// Returns a read-only snapshot of the latest committed state.
    fn snapshot(&self) -> Snapshot<R>;

    /// Validates and atomically applies the transaction's writes.
    ///
    /// # Errors
    ///
    /// Returns `CommitConflict` if a concurrent commit invalidated what the
    /// transaction observed; the transaction is aborted in that case.
    fn commit(&self, txn: &mut Transaction<R>) -> StoreResult<CommitOutcome<R>>;

    /// Discards the transaction's writes.
    fn abort(&self, txn: &mut Transaction<R>) -> StoreResult<()>;

    /// Returns the latest committed sequence.
    fn current_version(&self) -> ResourceVersion;
}
