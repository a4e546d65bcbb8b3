//! Service-to-service intent and the compiled address-group rules.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, ObjectRef, Protocol, RuleAction, Traffic};
use crate::ports::PortSpec;

/// Label carried by compiled rules, naming their owner as `namespace/name`.
pub const OWNER_LABEL: &str = "netguard.io/owner-rule-s2s";

/// Desired state of a RuleS2S.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleS2SSpec {
    /// Direction, from the local service's point of view.
    pub traffic: Traffic,
    /// Alias of the local service.
    pub service_local_ref: ObjectRef,
    /// Alias of the remote service.
    pub service_ref: ObjectRef,
    /// Propagated to compiled rules.
    #[serde(default)]
    pub trace: bool,
}

/// Declares that traffic is permitted between two services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleS2S {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: RuleS2SSpec,
    /// Rules compiled from this object. Maintained by the compiler.
    #[serde(default)]
    pub ie_ag_ag_rule_refs: Vec<ObjectRef>,
}

impl RuleS2S {
    /// Creates a rule between two aliases.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        traffic: Traffic,
        service_local_ref: ObjectRef,
        service_ref: ObjectRef,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: RuleS2SSpec {
                traffic,
                service_local_ref,
                service_ref,
                trace: false,
            },
            ie_ag_ag_rule_refs: Vec::new(),
        }
    }

    /// The local alias, with the namespace defaulted.
    #[must_use]
    pub fn local_alias(&self) -> ObjectRef {
        self.spec.service_local_ref.in_namespace(&self.metadata.namespace)
    }

    /// The remote alias, with the namespace defaulted.
    #[must_use]
    pub fn remote_alias(&self) -> ObjectRef {
        self.spec.service_ref.in_namespace(&self.metadata.namespace)
    }
}

/// Desired state of an IEAgAgRule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IeAgAgRuleSpec {
    /// Transport protocol.
    pub transport: Protocol,
    /// Direction.
    pub traffic: Traffic,
    /// Action applied to matching traffic.
    #[serde(default)]
    pub action: RuleAction,
    /// Local address group.
    pub address_group_local: ObjectRef,
    /// Remote address group.
    pub address_group: ObjectRef,
    /// Destination ports, coalesced and sorted.
    pub ports: Vec<PortSpec>,
    /// Priority.
    pub priority: i32,
    /// Trace matched traffic.
    #[serde(default)]
    pub trace: bool,
}

/// A compiled rule between two address groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IeAgAgRule {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: IeAgAgRuleSpec,
    /// The RuleS2S that produced this rule.
    pub owner: ObjectRef,
}
