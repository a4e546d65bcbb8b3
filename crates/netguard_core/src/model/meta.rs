//! Object metadata, references and status conditions.

use chrono::{DateTime, Utc};
use netguard_store::ResourceKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::Kind;

/// Metadata envelope shared by every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Unique id assigned on creation.
    #[serde(default)]
    pub uid: String,
    /// Version of the commit that last wrote the object; when supplied on
    /// update it is the version the caller expects to overwrite.
    #[serde(default)]
    pub resource_version: u64,
    /// Incremented on every spec change.
    #[serde(default)]
    pub generation: i64,
    /// Generation last seen by the condition reconciler.
    #[serde(default)]
    pub observed_generation: i64,
    /// Set on creation.
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Status conditions, ordered by type.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ObjectMeta {
    /// Creates metadata for a new object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Assigns creation-time fields: a fresh uid, generation 1 and the
    /// creation timestamp. Caller-supplied conditions are dropped.
    pub fn stamp_created(&mut self) {
        self.uid = uuid::Uuid::new_v4().to_string();
        self.generation = 1;
        self.observed_generation = 0;
        self.creation_timestamp = Some(Utc::now());
        self.conditions.clear();
    }

    /// Returns the condition of the given type, if set.
    #[must_use]
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Returns true if the condition of the given type is `True`.
    #[must_use]
    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

/// A reference to another object by namespace and name.
///
/// The target kind is implied by the field holding the reference. An empty
/// namespace means "the referrer's namespace".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Target name.
    pub name: String,
    /// Target namespace.
    #[serde(default)]
    pub namespace: String,
}

impl ObjectRef {
    /// Creates a reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Resolves an empty namespace to `default_namespace`.
    #[must_use]
    pub fn in_namespace(&self, default_namespace: &str) -> ObjectRef {
        if self.namespace.is_empty() {
            ObjectRef::new(default_namespace, self.name.clone())
        } else {
            self.clone()
        }
    }

    /// Returns the store key of the referenced object.
    #[must_use]
    pub fn key(&self, kind: Kind) -> ResourceKey {
        ResourceKey::new(kind.as_str(), self.namespace.clone(), self.name.clone())
    }

    /// Builds a reference from a store key.
    #[must_use]
    pub fn from_key(key: &ResourceKey) -> Self {
        Self::new(key.namespace.clone(), key.name.clone())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Condition types tracked for every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Structural, referential and domain checks passed.
    Validated,
    /// The write containing the object committed.
    Synced,
    /// Validated, synced, and every hard dependency resolves.
    Ready,
}

impl ConditionType {
    /// All condition types, in the order they are stored.
    pub const ALL: [ConditionType; 3] = [
        ConditionType::Validated,
        ConditionType::Synced,
        ConditionType::Ready,
    ];
}

/// Condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not determined.
    Unknown,
}

/// A typed status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Status.
    pub status: ConditionStatus,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When `status` last changed.
    pub last_transition_time: DateTime<Utc>,
    /// Generation the condition was computed for.
    #[serde(default)]
    pub observed_generation: i64,
}

impl Condition {
    /// Returns true if type, status, reason, message and generation match,
    /// ignoring the transition time.
    #[must_use]
    pub fn same_state(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_resolves_default_namespace() {
        let r = ObjectRef::new("", "web");
        assert_eq!(r.in_namespace("prod"), ObjectRef::new("prod", "web"));
        let r = ObjectRef::new("dev", "web");
        assert_eq!(r.in_namespace("prod"), ObjectRef::new("dev", "web"));
    }

    #[test]
    fn ref_key_roundtrip() {
        let r = ObjectRef::new("prod", "web");
        let key = r.key(Kind::Service);
        assert_eq!(key.kind, "Service");
        assert_eq!(ObjectRef::from_key(&key), r);
    }

    #[test]
    fn stamp_created_resets_lifecycle_fields() {
        let mut meta = ObjectMeta::new("ns", "a");
        meta.generation = 9;
        meta.conditions.push(Condition {
            condition_type: ConditionType::Synced,
            status: ConditionStatus::True,
            reason: "Forged".into(),
            message: String::new(),
            last_transition_time: Utc::now(),
            observed_generation: 9,
        });
        meta.stamp_created();
        assert_eq!(meta.generation, 1);
        assert!(meta.conditions.is_empty());
        assert!(meta.creation_timestamp.is_some());
        assert_eq!(meta.uid.len(), 36);
    }

    #[test]
    fn condition_lookup() {
        let mut meta = ObjectMeta::new("ns", "a");
        assert!(!meta.is_condition_true(ConditionType::Ready));
        meta.conditions.push(Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::True,
            reason: "Ready".into(),
            message: String::new(),
            last_transition_time: Utc::now(),
            observed_generation: 1,
        });
        assert!(meta.is_condition_true(ConditionType::Ready));
        assert!(!meta.is_condition_true(ConditionType::Synced));
    }
}
