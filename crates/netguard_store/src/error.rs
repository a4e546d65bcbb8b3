//! Error types for store operations.

use crate::types::{ResourceKey, ResourceVersion};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's expected resourceVersion does not match the stored one.
    #[error("version mismatch on {key}: expected {expected}, found {actual}")]
    VersionMismatch {
        /// Record identity.
        key: ResourceKey,
        /// Version the caller expected.
        expected: ResourceVersion,
        /// Version currently visible to the transaction.
        actual: ResourceVersion,
    },

    /// Commit-time validation found a concurrent write to something this
    /// transaction read or wrote.
    #[error("commit conflict on {key}: modified after snapshot {snapshot}")]
    CommitConflict {
        /// The first conflicting identity (or kind range, with empty name).
        key: ResourceKey,
        /// Snapshot the transaction read from.
        snapshot: ResourceVersion,
    },

    /// Create of an identity that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(ResourceKey),

    /// Update or delete of an identity that does not exist.
    #[error("not found: {0}")]
    NotFound(ResourceKey),

    /// Operation not permitted in the transaction's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Backend failure (I/O, connection loss) for non-memory backends.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Returns true if retrying the whole transaction against a fresh
    /// snapshot may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::CommitConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_commit_conflicts_are_retryable() {
        let key = ResourceKey::new("Service", "ns", "a");
        assert!(StoreError::CommitConflict {
            key: key.clone(),
            snapshot: ResourceVersion::new(3),
        }
        .is_retryable());
        assert!(!StoreError::VersionMismatch {
            key: key.clone(),
            expected: ResourceVersion::new(1),
            actual: ResourceVersion::new(2),
        }
        .is_retryable());
        assert!(!StoreError::NotFound(key).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::VersionMismatch {
            key: ResourceKey::new("Service", "ns", "a"),
            expected: ResourceVersion::new(1),
            actual: ResourceVersion::new(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("Service/ns/a"));
        assert!(msg.contains("expected 1"));
    }
}
