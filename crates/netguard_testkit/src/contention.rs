//! Injected commit races.
//!
//! [`ContendedStore`] wraps an in-memory store and, when armed, lets a rival
//! writer rewrite one identity just before a chosen commit. The commit then
//! fails the store's first-committer-wins check exactly as it would under a
//! real concurrent writer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use netguard_testkit::prelude::*;
//!
//! let plane = TestPlane::new();
//! // Let the sync's own commit through, then race the reconciler's.
//! plane.contention().contend(key, 1, 1);
//! ```

use netguard_core::Resource;
use netguard_store::{
    CommitOutcome, MemoryStore, Reader, Record, ResourceKey, ResourceStore, ResourceVersion,
    Snapshot, StoreResult, Transaction,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Contention {
    key: ResourceKey,
    skip: usize,
    remaining: usize,
}

/// An in-memory store whose commits can be made to lose a race.
#[derive(Debug, Default)]
pub struct ContendedStore {
    inner: MemoryStore<Resource>,
    armed: Mutex<Option<Contention>>,
}

impl ContendedStore {
    /// Creates an empty, unarmed store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a race on `key`: of the commits that write `key`, the first
    /// `skip` go through untouched and the following `times` are preceded
    /// by a rival rewrite of `key`.
    pub fn contend(&self, key: ResourceKey, skip: usize, times: usize) {
        *self.armed.lock() = Some(Contention {
            key,
            skip,
            remaining: times,
        });
    }

    /// Disarms any pending race.
    pub fn clear(&self) {
        *self.armed.lock() = None;
    }

    /// Races still to be injected.
    pub fn remaining(&self) -> usize {
        self.armed.lock().as_ref().map_or(0, |c| c.remaining)
    }

    fn target_for(&self, txn: &Transaction<Resource>) -> Option<ResourceKey> {
        let mut armed = self.armed.lock();
        let contention = armed.as_mut()?;
        txn.pending_write(&contention.key)?;
        if contention.skip > 0 {
            contention.skip -= 1;
            return None;
        }
        if contention.remaining == 0 {
            return None;
        }
        contention.remaining -= 1;
        Some(contention.key.clone())
    }

    /// Rewrites the committed state of `key` unchanged, bumping its version.
    fn rival_write(&self, key: &ResourceKey) -> StoreResult<()> {
        let mut rival = self.inner.begin()?;
        match rival.get(key)? {
            Some(mut current) => {
                current.set_resource_version(ResourceVersion::UNSET);
                rival.put(current)?;
                self.inner.commit(&mut rival)?;
            }
            None => self.inner.abort(&mut rival)?,
        }
        Ok(())
    }
}

impl ResourceStore<Resource> for ContendedStore {
    fn begin(&self) -> StoreResult<Transaction<Resource>> {
        self.inner.begin()
    }

    fn snapshot(&self) -> Snapshot<Resource> {
        self.inner.snapshot()
    }

    fn commit(&self, txn: &mut Transaction<Resource>) -> StoreResult<CommitOutcome<Resource>> {
        if let Some(key) = self.target_for(txn) {
            self.rival_write(&key)?;
        }
        self.inner.commit(txn)
    }

    fn abort(&self, txn: &mut Transaction<Resource>) -> StoreResult<()> {
        self.inner.abort(txn)
    }

    fn current_version(&self) -> ResourceVersion {
        self.inner.current_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netguard_core::Service;

    fn seeded() -> (ContendedStore, ResourceKey) {
        let store = ContendedStore::new();
        let service: Resource = Service::new("ns", "web").into();
        let key = service.key();
        let mut txn = store.begin().unwrap();
        txn.create(service).unwrap();
        store.commit(&mut txn).unwrap();
        (store, key)
    }

    fn touch(store: &ContendedStore, key: &ResourceKey) -> StoreResult<CommitOutcome<Resource>> {
        let mut txn = store.begin().unwrap();
        let current = txn.get(key).unwrap().unwrap();
        txn.update(current).unwrap();
        store.commit(&mut txn)
    }

    #[test]
    fn armed_commit_loses_the_race() {
        let (store, key) = seeded();
        store.contend(key.clone(), 1, 1);

        assert!(touch(&store, &key).is_ok());
        let err = touch(&store, &key).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.remaining(), 0);
        assert!(touch(&store, &key).is_ok());
    }

    #[test]
    fn unrelated_commits_are_not_raced() {
        let (store, key) = seeded();
        store.contend(key, 0, 1);

        let other: Resource = Service::new("ns", "db").into();
        let mut txn = store.begin().unwrap();
        txn.create(other.clone()).unwrap();
        store.commit(&mut txn).unwrap();
        assert_eq!(store.remaining(), 1);

        store.clear();
        assert!(touch(&store, &other.key()).is_ok());
        assert_eq!(store.remaining(), 0);
    }

    #[test]
    fn unarmed_store_passes_through() {
        let (store, key) = seeded();
        let version = store.current_version();
        assert!(touch(&store, &key).is_ok());
        assert!(store.current_version() > version);
    }
}
