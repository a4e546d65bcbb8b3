//! Core type definitions for the resource store.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Store-wide commit sequence, stamped on every record a commit touches.
///
/// A record's `resourceVersion` is the sequence of the commit that last
/// wrote it, so versions are monotonic per identity and totally ordered
/// across the store. Zero means "never stored".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceVersion(pub u64);

impl ResourceVersion {
    /// The version of a record that has not been committed yet.
    pub const UNSET: Self = Self(0);

    /// Creates a new resource version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this is the unset version.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a stored record: `(kind, namespace, name)`.
///
/// Cluster-scoped kinds use an empty namespace. Keys order by kind first,
/// so every record of a kind forms one contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// Kind name, e.g. `Service`.
    pub kind: &'static str,
    /// Namespace (empty for cluster-scoped kinds).
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ResourceKey {
    /// Creates a new key.
    pub fn new(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Smallest key of the given kind and namespace, used as a range start.
    pub(crate) fn lower_bound(kind: &'static str, namespace: Option<&str>) -> Self {
        Self {
            kind,
            namespace: namespace.unwrap_or_default().to_string(),
            name: String::new(),
        }
    }

    /// Returns true if the key belongs to `kind` (and `namespace`, when given).
    #[must_use]
    pub fn matches(&self, kind: &str, namespace: Option<&str>) -> bool {
        self.kind == kind && namespace.map_or(true, |ns| self.namespace == ns)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}
