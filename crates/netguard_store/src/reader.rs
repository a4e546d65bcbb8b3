//! Read access to a consistent view of the store.

use crate::error::StoreResult;
use crate::record::Record;
use crate::types::{ResourceKey, ResourceVersion};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Point lookups and scoped listing over a consistent view.
///
/// Implemented by [`Snapshot`] (committed state only) and by
/// [`crate::Transaction`] (committed state overlaid with the transaction's
/// own pending writes, so validation and compilation see the writes of the
/// batch being applied).
pub trait Reader<R: Record> {
    /// Returns the record with the given identity, if visible.
    fn get(&self, key: &ResourceKey) -> StoreResult<Option<R>>;

    /// Lists every visible record of `kind`, optionally restricted to one
    /// namespace, ordered by key.
    fn list(&self, kind: &'static str, namespace: Option<&str>) -> StoreResult<Vec<R>>;

    /// Returns the commit sequence this view was taken at.
    fn snapshot_version(&self) -> ResourceVersion;

    /// Returns true if a record with the given identity is visible.
    fn exists(&self, key: &ResourceKey) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// An immutable view of the committed state at one commit sequence.
///
/// Snapshots are cheap to take: they share the committed map with the
/// store until the next commit replaces it.
#[derive(Debug)]
pub struct Snapshot<R> {
    data: Arc<BTreeMap<ResourceKey, R>>,
    version: ResourceVersion,
}

impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            version: self.version,
        }
    }
}

impl<R: Record> Snapshot<R> {
    pub(crate) fn new(data: Arc<BTreeMap<ResourceKey, R>>, version: ResourceVersion) -> Self {
        Self { data, version }
    }

    /// Returns the commit sequence this snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> ResourceVersion {
        self.version
    }

    /// Returns the number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over every record in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &R)> {
        self.data.iter()
    }

    pub(crate) fn lookup(&self, key: &ResourceKey) -> Option<&R> {
        self.data.get(key)
    }

    pub(crate) fn range<'a>(
        &'a self,
        kind: &'static str,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a ResourceKey, &'a R)> + 'a {
        self.data
            .range(ResourceKey::lower_bound(kind, namespace)..)
            .take_while(move |(k, _)| k.kind == kind)
            .filter(move |(k, _)| k.matches(kind, namespace))
    }
}

impl<R: Record> Reader<R> for Snapshot<R> {
    fn get(&self, key: &ResourceKey) -> StoreResult<Option<R>> {
        Ok(self.lookup(key).cloned())
    }

    fn list(&self, kind: &'static str, namespace: Option<&str>) -> StoreResult<Vec<R>> {
        Ok(self.range(kind, namespace).map(|(_, r)| r.clone()).collect())
    }

    fn snapshot_version(&self) -> ResourceVersion {
        self.version
    }
}
