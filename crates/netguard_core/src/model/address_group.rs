//! AddressGroup, its bindings, binding policies and port mappings.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, ObjectRef, RuleAction};
use crate::ports::PortRange;

/// Desired state of an AddressGroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupSpec {
    /// Action for traffic no rule matches.
    #[serde(default)]
    pub default_action: RuleAction,
    /// Log matched traffic.
    #[serde(default)]
    pub logs: bool,
    /// Trace matched traffic.
    #[serde(default)]
    pub trace: bool,
}

/// A network bound into an address group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkItem {
    /// Network name.
    pub name: String,
    /// Network CIDR.
    pub cidr: String,
    /// The Network object.
    pub network_ref: ObjectRef,
}

/// A named collection of network addresses with a default action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroup {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: AddressGroupSpec,
    /// Networks bound through NetworkBindings. Maintained by binding writes.
    #[serde(default)]
    pub networks: Vec<NetworkItem>,
}

impl AddressGroup {
    /// Creates an address group with the given default action.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, default_action: RuleAction) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: AddressGroupSpec {
                default_action,
                ..AddressGroupSpec::default()
            },
            networks: Vec::new(),
        }
    }
}

/// A Service-to-AddressGroup pair, shared by bindings and binding policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupBindingSpec {
    /// The bound service.
    pub service_ref: ObjectRef,
    /// The address group.
    pub address_group_ref: ObjectRef,
}

/// Associates a Service with an AddressGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupBinding {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: AddressGroupBindingSpec,
}

impl AddressGroupBinding {
    /// Creates a binding.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        service_ref: ObjectRef,
        address_group_ref: ObjectRef,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: AddressGroupBindingSpec {
                service_ref,
                address_group_ref,
            },
        }
    }

    /// The bound service, with the namespace defaulted.
    #[must_use]
    pub fn service(&self) -> ObjectRef {
        self.spec.service_ref.in_namespace(&self.metadata.namespace)
    }

    /// The bound address group, with the namespace defaulted.
    #[must_use]
    pub fn address_group(&self) -> ObjectRef {
        self.spec.address_group_ref.in_namespace(&self.metadata.namespace)
    }

    /// Returns true if the service and address group live in different namespaces.
    #[must_use]
    pub fn is_cross_namespace(&self) -> bool {
        self.service().namespace != self.address_group().namespace
    }
}

/// Allow-list entry approving cross-namespace bindings of one service to
/// one address group. Lives in the address group's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupBindingPolicy {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// The approved pair.
    pub spec: AddressGroupBindingSpec,
}

impl AddressGroupBindingPolicy {
    /// Creates a policy.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        service_ref: ObjectRef,
        address_group_ref: ObjectRef,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: AddressGroupBindingSpec {
                service_ref,
                address_group_ref,
            },
        }
    }

    /// The approved service, with the namespace defaulted.
    #[must_use]
    pub fn service(&self) -> ObjectRef {
        self.spec.service_ref.in_namespace(&self.metadata.namespace)
    }

    /// The approved address group, with the namespace defaulted.
    #[must_use]
    pub fn address_group(&self) -> ObjectRef {
        self.spec.address_group_ref.in_namespace(&self.metadata.namespace)
    }
}

/// Ports of one service reachable through an address group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePorts {
    /// The service.
    pub service_ref: ObjectRef,
    /// TCP ranges.
    #[serde(default)]
    pub tcp: Vec<PortRange>,
    /// UDP ranges.
    #[serde(default)]
    pub udp: Vec<PortRange>,
}

/// Index of the service ports reachable through one address group.
///
/// Named after its address group and maintained entirely by binding and
/// service writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupPortMapping {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Per-service ports, ordered by service.
    #[serde(default)]
    pub access_ports: Vec<ServicePorts>,
}

impl AddressGroupPortMapping {
    /// Creates an empty mapping for the address group `group`.
    #[must_use]
    pub fn for_group(group: &ObjectRef) -> Self {
        Self {
            metadata: ObjectMeta::new(group.namespace.clone(), group.name.clone()),
            access_ports: Vec::new(),
        }
    }

    /// Inserts or replaces the entry for `ports.service_ref`.
    pub fn upsert(&mut self, ports: ServicePorts) {
        match self
            .access_ports
            .binary_search_by(|p| p.service_ref.cmp(&ports.service_ref))
        {
            Ok(i) => self.access_ports[i] = ports,
            Err(i) => self.access_ports.insert(i, ports),
        }
    }

    /// Removes the entry for `service`. Returns true if one was removed.
    pub fn remove(&mut self, service: &ObjectRef) -> bool {
        let before = self.access_ports.len();
        self.access_ports.retain(|p| &p.service_ref != service);
        before != self.access_ports.len()
    }
}
