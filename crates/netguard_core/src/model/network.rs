//! Networks and their bindings into address groups.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, ObjectRef};

/// Desired state of a Network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Address block. Immutable once the network is bound.
    pub cidr: String,
}

/// A CIDR block that can be bound into one address group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: NetworkSpec,
    /// True while a NetworkBinding references this network.
    #[serde(default)]
    pub is_bound: bool,
    /// The binding, when bound.
    #[serde(default)]
    pub binding_ref: Option<ObjectRef>,
    /// The address group, when bound.
    #[serde(default)]
    pub address_group_ref: Option<ObjectRef>,
}

impl Network {
    /// Creates an unbound network.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: NetworkSpec { cidr: cidr.into() },
            is_bound: false,
            binding_ref: None,
            address_group_ref: None,
        }
    }
}

/// Desired state of a NetworkBinding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBindingSpec {
    /// The bound network.
    pub network_ref: ObjectRef,
    /// The address group receiving the network.
    pub address_group_ref: ObjectRef,
}

/// Binds a Network into an AddressGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBinding {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: NetworkBindingSpec,
}

impl NetworkBinding {
    /// Creates a binding.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        network_ref: ObjectRef,
        address_group_ref: ObjectRef,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: NetworkBindingSpec {
                network_ref,
                address_group_ref,
            },
        }
    }

    /// The network, with the namespace defaulted.
    #[must_use]
    pub fn network(&self) -> ObjectRef {
        self.spec.network_ref.in_namespace(&self.metadata.namespace)
    }

    /// The address group, with the namespace defaulted.
    #[must_use]
    pub fn address_group(&self) -> ObjectRef {
        self.spec.address_group_ref.in_namespace(&self.metadata.namespace)
    }
}
