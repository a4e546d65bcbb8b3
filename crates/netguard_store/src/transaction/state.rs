//! Transaction state.

use crate::error::{StoreError, StoreResult};
use crate::reader::{Reader, Snapshot};
use crate::record::Record;
use crate::types::{ResourceKey, ResourceVersion, TransactionId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A pending write in a transaction.
#[derive(Debug, Clone)]
pub enum PendingWrite<R> {
    /// Insert or replace a record.
    Put(R),
    /// Delete a record.
    Delete,
}

/// What a transaction observed, validated at commit time.
#[derive(Debug, Default, Clone)]
pub struct ReadSet {
    /// Point reads and write targets: identity -> version seen in the snapshot.
    pub keys: BTreeMap<ResourceKey, Option<ResourceVersion>>,
    /// Kinds that were range-scanned.
    pub kinds: BTreeSet<&'static str>,
}

/// An active writer transaction.
///
/// Writes are buffered until commit. The transaction also implements
/// [`Reader`], overlaying its pending writes on its snapshot; reads through
/// that interface are recorded for commit-time conflict detection.
///
/// Dropping an uncommitted transaction discards its writes.
#[derive(Debug)]
pub struct Transaction<R: Record> {
    id: TransactionId,
    snapshot: Snapshot<R>,
    state: TransactionState,
    writes: BTreeMap<ResourceKey, PendingWrite<R>>,
    reads: Mutex<ReadSet>,
}

impl<R: Record> Transaction<R> {
    /// Creates a new transaction over `snapshot`.
    pub fn new(id: TransactionId, snapshot: Snapshot<R>) -> Self {
        Self {
            id,
            snapshot,
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            reads: Mutex::new(ReadSet::default()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot the transaction reads from, without its own
    /// pending writes.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot<R> {
        &self.snapshot
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Inserts a record that must not already be visible.
    pub fn create(&mut self, record: R) -> StoreResult<()> {
        self.ensure_active()?;
        let key = record.key();
        if self.visible(&key).is_some() {
            return Err(StoreError::AlreadyExists(key));
        }
        self.stage(key, PendingWrite::Put(record));
        Ok(())
    }

    /// Replaces a record that must already be visible.
    ///
    /// If the record carries a non-zero `resource_version`, it must equal
    /// the visible version (optimistic concurrency).
    pub fn update(&mut self, record: R) -> StoreResult<()> {
        self.ensure_active()?;
        let key = record.key();
        let current = self
            .visible(&key)
            .map(Record::resource_version)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_expected(&key, record.resource_version(), current)?;
        self.stage(key, PendingWrite::Put(record));
        Ok(())
    }

    /// Inserts or replaces a record.
    ///
    /// A non-zero `resource_version` is checked against the visible record
    /// exactly as in [`Transaction::update`].
    pub fn put(&mut self, record: R) -> StoreResult<()> {
        self.ensure_active()?;
        let key = record.key();
        if let Some(current) = self.visible(&key).map(Record::resource_version) {
            check_expected(&key, record.resource_version(), current)?;
        } else if !record.resource_version().is_unset() {
            return Err(StoreError::NotFound(key));
        }
        self.stage(key, PendingWrite::Put(record));
        Ok(())
    }

    /// Deletes a visible record.
    pub fn delete(&mut self, key: &ResourceKey) -> StoreResult<()> {
        self.ensure_active()?;
        if self.visible(key).is_none() {
            return Err(StoreError::NotFound(key.clone()));
        }
        self.stage(key.clone(), PendingWrite::Delete);
        Ok(())
    }

    /// Gets a pending write for an identity.
    #[must_use]
    pub fn pending_write(&self, key: &ResourceKey) -> Option<&PendingWrite<R>> {
        self.writes.get(key)
    }

    /// Returns all pending writes in key order.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&ResourceKey, &PendingWrite<R>)> {
        self.writes.iter()
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns a copy of everything the transaction observed.
    #[must_use]
    pub fn read_set(&self) -> ReadSet {
        self.reads.lock().clone()
    }

    pub(crate) fn take_writes(&mut self) -> BTreeMap<ResourceKey, PendingWrite<R>> {
        std::mem::take(&mut self.writes)
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as aborted and drops its writes.
    pub(crate) fn mark_aborted(&mut self) {
        self.writes.clear();
        self.state = TransactionState::Aborted;
    }

    /// Ensures the transaction is active.
    fn ensure_active(&self) -> StoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(StoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(StoreError::invalid_operation("transaction already aborted"))
            }
        }
    }

    /// Records the snapshot version of a write target before staging it.
    fn stage(&mut self, key: ResourceKey, write: PendingWrite<R>) {
        let base = self.snapshot.lookup(&key).map(Record::resource_version);
        self.reads.lock().keys.entry(key.clone()).or_insert(base);
        self.writes.insert(key, write);
    }

    /// The record visible to this transaction: pending write first, then snapshot.
    fn visible(&self, key: &ResourceKey) -> Option<&R> {
        match self.writes.get(key) {
            Some(PendingWrite::Put(record)) => Some(record),
            Some(PendingWrite::Delete) => None,
            None => self.snapshot.lookup(key),
        }
    }
}

impl<R: Record> Reader<R> for Transaction<R> {
    fn get(&self, key: &ResourceKey) -> StoreResult<Option<R>> {
        if !self.writes.contains_key(key) {
            let observed = self.snapshot.lookup(key).map(Record::resource_version);
            self.reads.lock().keys.entry(key.clone()).or_insert(observed);
        }
        Ok(self.visible(key).cloned())
    }

    fn list(&self, kind: &'static str, namespace: Option<&str>) -> StoreResult<Vec<R>> {
        self.reads.lock().kinds.insert(kind);

        let mut merged: BTreeMap<&ResourceKey, &R> = self.snapshot.range(kind, namespace).collect();
        for (key, write) in self.writes.iter().filter(|(k, _)| k.matches(kind, namespace)) {
            match write {
                PendingWrite::Put(record) => {
                    merged.insert(key, record);
                }
                PendingWrite::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().cloned().collect())
    }

    fn snapshot_version(&self) -> ResourceVersion {
        self.snapshot.snapshot_version()
    }
}

fn check_expected(
    key: &ResourceKey,
    expected: ResourceVersion,
    actual: ResourceVersion,
) -> StoreResult<()> {
    if !expected.is_unset() && expected != actual {
        return Err(StoreError::VersionMismatch {
            key: key.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_record::Item;
    use std::sync::Arc;

    fn committed(items: Vec<Item>) -> Snapshot<Item> {
        let data = items
            .into_iter()
            .map(|mut i| {
                i.version = ResourceVersion::new(3);
                (i.key(), i)
            })
            .collect();
        Snapshot::new(Arc::new(data), ResourceVersion::new(3))
    }

    fn create_txn(items: Vec<Item>) -> Transaction<Item> {
        Transaction::new(TransactionId::new(1), committed(items))
    }

    #[test]
    fn new_transaction_is_active() {
        let txn = create_txn(vec![]);
        assert!(txn.is_active());
        assert_eq!(txn.state(), TransactionState::Active);
    }

    #[test]
    fn create_rejects_existing() {
        let mut txn = create_txn(vec![Item::new("A", "ns", "x", 1)]);
        let err = txn.create(Item::new("A", "ns", "x", 2)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn update_requires_existing() {
        let mut txn = create_txn(vec![]);
        let err = txn.update(Item::new("A", "ns", "x", 2)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn update_checks_expected_version() {
        let mut txn = create_txn(vec![Item::new("A", "ns", "x", 1)]);

        let mut stale = Item::new("A", "ns", "x", 2);
        stale.version = ResourceVersion::new(2);
        assert!(matches!(
            txn.update(stale).unwrap_err(),
            StoreError::VersionMismatch { .. }
        ));

        let mut fresh = Item::new("A", "ns", "x", 2);
        fresh.version = ResourceVersion::new(3);
        txn.update(fresh).unwrap();

        // Unset version skips the check.
        txn.update(Item::new("A", "ns", "x", 3)).unwrap();
        assert_eq!(txn.write_count(), 1);
    }

    #[test]
    fn put_with_version_requires_existing() {
        let mut txn = create_txn(vec![]);
        let mut item = Item::new("A", "ns", "x", 1);
        item.version = ResourceVersion::new(9);
        assert!(matches!(txn.put(item).unwrap_err(), StoreError::NotFound(_)));
        txn.put(Item::new("A", "ns", "x", 1)).unwrap();
    }

    #[test]
    fn reads_see_pending_writes() {
        let mut txn = create_txn(vec![Item::new("A", "ns", "x", 1), Item::new("A", "ns", "y", 1)]);
        txn.put(Item::new("A", "ns", "z", 5)).unwrap();
        txn.delete(&ResourceKey::new("A", "ns", "x")).unwrap();

        let names: Vec<String> = txn
            .list("A", None)
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["y".to_string(), "z".to_string()]);
        assert!(txn.get(&ResourceKey::new("A", "ns", "x")).unwrap().is_none());

        // The snapshot itself is untouched.
        assert!(txn.snapshot().exists(&ResourceKey::new("A", "ns", "x")).unwrap());
    }

    #[test]
    fn delete_requires_visible() {
        let mut txn = create_txn(vec![]);
        assert!(matches!(
            txn.delete(&ResourceKey::new("A", "ns", "x")).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn read_set_tracks_reads_and_scans() {
        let mut txn = create_txn(vec![Item::new("A", "ns", "x", 1)]);
        txn.get(&ResourceKey::new("A", "ns", "x")).unwrap();
        txn.get(&ResourceKey::new("A", "ns", "missing")).unwrap();
        txn.list("B", None).unwrap();
        txn.put(Item::new("C", "ns", "new", 1)).unwrap();

        let reads = txn.read_set();
        assert_eq!(
            reads.keys.get(&ResourceKey::new("A", "ns", "x")),
            Some(&Some(ResourceVersion::new(3)))
        );
        assert_eq!(reads.keys.get(&ResourceKey::new("A", "ns", "missing")), Some(&None));
        assert_eq!(reads.keys.get(&ResourceKey::new("C", "ns", "new")), Some(&None));
        assert!(reads.kinds.contains("B"));
    }

    #[test]
    fn cannot_write_after_commit() {
        let mut txn = create_txn(vec![]);
        txn.mark_committed();
        assert!(txn.put(Item::new("A", "ns", "x", 1)).is_err());
    }

    #[test]
    fn cannot_write_after_abort() {
        let mut txn = create_txn(vec![]);
        txn.put(Item::new("A", "ns", "x", 1)).unwrap();
        txn.mark_aborted();
        assert_eq!(txn.write_count(), 0);
        assert!(txn.delete(&ResourceKey::new("A", "ns", "x")).is_err());
    }
}
