//! The record contract stored values must satisfy.

use crate::types::{ResourceKey, ResourceVersion};

/// A value that can live in the store.
///
/// The store never interprets records beyond their identity and version:
/// it stamps `resource_version` on commit and uses the key for placement
/// and conflict detection.
pub trait Record: Clone + Send + Sync + 'static {
    /// Returns the identity of this record.
    fn key(&self) -> ResourceKey;

    /// Returns the version this record was last committed at, or the
    /// version the caller expects to overwrite.
    fn resource_version(&self) -> ResourceVersion;

    /// Sets the record's version. Called by the store on commit.
    fn set_resource_version(&mut self, version: ResourceVersion);
}
