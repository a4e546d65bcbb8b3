//! Resource kinds.
//!
//! Every kind shares [`ObjectMeta`] and is stored as a [`Resource`].
//! References between objects are [`ObjectRef`]s; the referenced kind is
//! implied by the field.

mod address_group;
mod enums;
mod meta;
mod network;
mod resource;
mod rule;
mod service;

pub use address_group::{
    AddressGroup, AddressGroupBinding, AddressGroupBindingPolicy, AddressGroupBindingSpec,
    AddressGroupPortMapping, AddressGroupSpec, NetworkItem, ServicePorts,
};
pub use enums::{Protocol, RuleAction, Traffic};
pub use meta::{Condition, ConditionStatus, ConditionType, ObjectMeta, ObjectRef};
pub use network::{Network, NetworkBinding, NetworkBindingSpec, NetworkSpec};
pub use resource::{Kind, Resource, TypedReader, TypedResource};
pub use rule::{IeAgAgRule, IeAgAgRuleSpec, RuleS2S, RuleS2SSpec, OWNER_LABEL};
pub use service::{IngressPort, Service, ServiceAlias, ServiceAliasSpec, ServiceSpec};
