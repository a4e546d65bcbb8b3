//! Error types for the netguard control plane.

use netguard_store::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type for control-plane operations.
pub type NetguardResult<T> = Result<T, NetguardError>;

/// Errors surfaced by validation, compilation, sync and reconciliation.
///
/// Every variant except [`NetguardError::Reconcile`] is returned
/// synchronously to the caller of a sync, with nothing written.
#[derive(Debug, Error)]
pub enum NetguardError {
    /// A field is malformed or violates a domain rule.
    #[error("validation failed for {object}: {message}")]
    Validation {
        /// The offending object.
        object: String,
        /// What is wrong.
        message: String,
    },

    /// A reference points at an object that does not exist.
    #[error("{object} references missing {target}")]
    Reference {
        /// The referencing object.
        object: String,
        /// The missing target.
        target: String,
    },

    /// Optimistic-concurrency or commit-time conflict.
    #[error("conflict on {object}: {message}")]
    Conflict {
        /// The contended object.
        object: String,
        /// What conflicted.
        message: String,
        /// True if re-running the same batch may succeed.
        retryable: bool,
    },

    /// A delete is blocked by live referrers.
    #[error("cannot delete {object}: still referenced by {}", .referrers.join(", "))]
    Dependency {
        /// The object being deleted.
        object: String,
        /// Objects that still reference it.
        referrers: Vec<String>,
    },

    /// Deriving compiled rules failed.
    #[error("compile failed for {rule}: {message}")]
    Compile {
        /// The RuleS2S being compiled.
        rule: String,
        /// What went wrong.
        message: String,
    },

    /// Persisting conditions after commit failed.
    #[error("reconcile failed for {object}: {message}")]
    Reconcile {
        /// The object being reconciled.
        object: String,
        /// What went wrong.
        message: String,
    },

    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl NetguardError {
    /// Creates a validation error.
    pub fn validation(object: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Validation {
            object: object.to_string(),
            message: message.into(),
        }
    }

    /// Creates a reference error.
    pub fn reference(object: impl fmt::Display, target: impl fmt::Display) -> Self {
        Self::Reference {
            object: object.to_string(),
            target: target.to_string(),
        }
    }

    /// Creates a non-retryable conflict error.
    pub fn conflict(object: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Conflict {
            object: object.to_string(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a dependency error.
    pub fn dependency<I, S>(object: impl fmt::Display, referrers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        Self::Dependency {
            object: object.to_string(),
            referrers: referrers.into_iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Creates a compile error.
    pub fn compile(rule: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Compile {
            rule: rule.to_string(),
            message: message.into(),
        }
    }

    /// Creates a reconcile error.
    pub fn reconcile(object: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Reconcile {
            object: object.to_string(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(object: impl fmt::Display) -> Self {
        Self::NotFound(object.to_string())
    }

    /// Returns true if the operation may succeed when re-run unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { retryable: true, .. })
    }
}

impl From<StoreError> for NetguardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionMismatch {
                key,
                expected,
                actual,
            } => Self::Conflict {
                object: key.to_string(),
                message: format!("expected resourceVersion {expected}, found {actual}"),
                retryable: false,
            },
            StoreError::CommitConflict { key, snapshot } => Self::Conflict {
                object: key.to_string(),
                message: format!("modified by a concurrent commit after version {snapshot}"),
                retryable: true,
            },
            StoreError::AlreadyExists(key) => Self::conflict(key, "already exists"),
            StoreError::NotFound(key) => Self::NotFound(key.to_string()),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netguard_store::{ResourceKey, ResourceVersion};

    #[test]
    fn store_conflicts_map_to_conflict() {
        let key = ResourceKey::new("Service", "ns", "web");
        let err: NetguardError = StoreError::CommitConflict {
            key: key.clone(),
            snapshot: ResourceVersion::new(4),
        }
        .into();
        assert!(err.is_retryable());

        let err: NetguardError = StoreError::VersionMismatch {
            key: key.clone(),
            expected: ResourceVersion::new(1),
            actual: ResourceVersion::new(2),
        }
        .into();
        assert!(matches!(err, NetguardError::Conflict { retryable: false, .. }));

        let err: NetguardError = StoreError::NotFound(key).into();
        assert!(matches!(err, NetguardError::NotFound(_)));
    }

    #[test]
    fn dependency_message_names_referrers() {
        let err = NetguardError::dependency(
            "Service/ns/web",
            ["ServiceAlias/ns/a", "ServiceAlias/ns/b"],
        );
        assert_eq!(
            err.to_string(),
            "cannot delete Service/ns/web: still referenced by ServiceAlias/ns/a, ServiceAlias/ns/b"
        );
        assert!(!err.is_retryable());
    }
}
