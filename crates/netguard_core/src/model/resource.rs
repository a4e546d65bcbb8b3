//! The closed set of kinds and the [`Resource`] envelope stored in the store.

use netguard_store::{Reader, Record, ResourceKey, ResourceVersion, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{
    AddressGroup, AddressGroupBinding, AddressGroupBindingPolicy, AddressGroupPortMapping,
    IeAgAgRule, Network, NetworkBinding, ObjectMeta, ObjectRef, RuleS2S, Service, ServiceAlias,
};

/// Every kind the control plane manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// [`Service`]
    Service,
    /// [`AddressGroup`]
    AddressGroup,
    /// [`AddressGroupBinding`]
    AddressGroupBinding,
    /// [`AddressGroupBindingPolicy`]
    AddressGroupBindingPolicy,
    /// [`AddressGroupPortMapping`]
    AddressGroupPortMapping,
    /// [`ServiceAlias`]
    ServiceAlias,
    /// [`RuleS2S`]
    RuleS2S,
    /// [`IeAgAgRule`]
    #[serde(rename = "IEAgAgRule")]
    IeAgAgRule,
    /// [`Network`]
    Network,
    /// [`NetworkBinding`]
    NetworkBinding,
}

impl Kind {
    /// All kinds.
    pub const ALL: [Kind; 10] = [
        Kind::Service,
        Kind::AddressGroup,
        Kind::AddressGroupBinding,
        Kind::AddressGroupBindingPolicy,
        Kind::AddressGroupPortMapping,
        Kind::ServiceAlias,
        Kind::RuleS2S,
        Kind::IeAgAgRule,
        Kind::Network,
        Kind::NetworkBinding,
    ];

    /// The kind name used in store keys and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Service => "Service",
            Kind::AddressGroup => "AddressGroup",
            Kind::AddressGroupBinding => "AddressGroupBinding",
            Kind::AddressGroupBindingPolicy => "AddressGroupBindingPolicy",
            Kind::AddressGroupPortMapping => "AddressGroupPortMapping",
            Kind::ServiceAlias => "ServiceAlias",
            Kind::RuleS2S => "RuleS2S",
            Kind::IeAgAgRule => "IEAgAgRule",
            Kind::Network => "Network",
            Kind::NetworkBinding => "NetworkBinding",
        }
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Returns false for kinds only the control plane itself writes.
    #[must_use]
    pub const fn is_user_writable(self) -> bool {
        !matches!(self, Kind::AddressGroupPortMapping | Kind::IeAgAgRule)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored object of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    /// A service.
    Service(Service),
    /// An address group.
    AddressGroup(AddressGroup),
    /// A service-to-group binding.
    AddressGroupBinding(AddressGroupBinding),
    /// A cross-namespace binding approval.
    AddressGroupBindingPolicy(AddressGroupBindingPolicy),
    /// A derived port index.
    AddressGroupPortMapping(AddressGroupPortMapping),
    /// A service alias.
    ServiceAlias(ServiceAlias),
    /// A service-to-service rule.
    RuleS2S(RuleS2S),
    /// A compiled rule.
    #[serde(rename = "IEAgAgRule")]
    IeAgAgRule(IeAgAgRule),
    /// A network.
    Network(Network),
    /// A network binding.
    NetworkBinding(NetworkBinding),
}

macro_rules! each_variant {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Resource::Service($inner) => $body,
            Resource::AddressGroup($inner) => $body,
            Resource::AddressGroupBinding($inner) => $body,
            Resource::AddressGroupBindingPolicy($inner) => $body,
            Resource::AddressGroupPortMapping($inner) => $body,
            Resource::ServiceAlias($inner) => $body,
            Resource::RuleS2S($inner) => $body,
            Resource::IeAgAgRule($inner) => $body,
            Resource::Network($inner) => $body,
            Resource::NetworkBinding($inner) => $body,
        }
    };
}

impl Resource {
    /// The object's kind.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Resource::Service(_) => Kind::Service,
            Resource::AddressGroup(_) => Kind::AddressGroup,
            Resource::AddressGroupBinding(_) => Kind::AddressGroupBinding,
            Resource::AddressGroupBindingPolicy(_) => Kind::AddressGroupBindingPolicy,
            Resource::AddressGroupPortMapping(_) => Kind::AddressGroupPortMapping,
            Resource::ServiceAlias(_) => Kind::ServiceAlias,
            Resource::RuleS2S(_) => Kind::RuleS2S,
            Resource::IeAgAgRule(_) => Kind::IeAgAgRule,
            Resource::Network(_) => Kind::Network,
            Resource::NetworkBinding(_) => Kind::NetworkBinding,
        }
    }

    /// The object's metadata.
    #[must_use]
    pub fn meta(&self) -> &ObjectMeta {
        each_variant!(self, r => &r.metadata)
    }

    /// Mutable metadata.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        each_variant!(self, r => &mut r.metadata)
    }

    /// This object as a reference.
    #[must_use]
    pub fn object_ref(&self) -> ObjectRef {
        let meta = self.meta();
        ObjectRef::new(meta.namespace.clone(), meta.name.clone())
    }

    /// Returns true if both objects are the same kind with equal desired state.
    #[must_use]
    pub fn spec_eq(&self, other: &Resource) -> bool {
        match (self, other) {
            (Resource::Service(a), Resource::Service(b)) => a.spec == b.spec,
            (Resource::AddressGroup(a), Resource::AddressGroup(b)) => a.spec == b.spec,
            (Resource::AddressGroupBinding(a), Resource::AddressGroupBinding(b)) => a.spec == b.spec,
            (Resource::AddressGroupBindingPolicy(a), Resource::AddressGroupBindingPolicy(b)) => {
                a.spec == b.spec
            }
            (Resource::AddressGroupPortMapping(a), Resource::AddressGroupPortMapping(b)) => {
                a.access_ports == b.access_ports
            }
            (Resource::ServiceAlias(a), Resource::ServiceAlias(b)) => a.spec == b.spec,
            (Resource::RuleS2S(a), Resource::RuleS2S(b)) => a.spec == b.spec,
            (Resource::IeAgAgRule(a), Resource::IeAgAgRule(b)) => {
                a.spec == b.spec && a.owner == b.owner
            }
            (Resource::Network(a), Resource::Network(b)) => a.spec == b.spec,
            (Resource::NetworkBinding(a), Resource::NetworkBinding(b)) => a.spec == b.spec,
            _ => false,
        }
    }

    /// Resets the fields the control plane maintains, for a new object.
    pub fn clear_status(&mut self) {
        match self {
            Resource::Service(s) => s.address_groups.clear(),
            Resource::AddressGroup(ag) => ag.networks.clear(),
            Resource::RuleS2S(r) => r.ie_ag_ag_rule_refs.clear(),
            Resource::Network(n) => {
                n.is_bound = false;
                n.binding_ref = None;
                n.address_group_ref = None;
            }
            _ => {}
        }
    }

    /// Copies the fields the control plane maintains from `previous`.
    ///
    /// Callers replace the desired state; status fields and conditions stay
    /// with the stored object.
    pub fn inherit_status(&mut self, previous: &Resource) {
        match (&mut *self, previous) {
            (Resource::Service(a), Resource::Service(b)) => {
                a.address_groups = b.address_groups.clone();
            }
            (Resource::AddressGroup(a), Resource::AddressGroup(b)) => {
                a.networks = b.networks.clone();
            }
            (Resource::RuleS2S(a), Resource::RuleS2S(b)) => {
                a.ie_ag_ag_rule_refs = b.ie_ag_ag_rule_refs.clone();
            }
            (Resource::Network(a), Resource::Network(b)) => {
                a.is_bound = b.is_bound;
                a.binding_ref = b.binding_ref.clone();
                a.address_group_ref = b.address_group_ref.clone();
            }
            _ => {}
        }
        let prev = previous.meta();
        let meta = self.meta_mut();
        meta.uid = prev.uid.clone();
        meta.creation_timestamp = prev.creation_timestamp;
        meta.generation = prev.generation;
        meta.observed_generation = prev.observed_generation;
        meta.conditions = prev.conditions.clone();
    }
}

impl Record for Resource {
    fn key(&self) -> ResourceKey {
        let meta = self.meta();
        ResourceKey::new(self.kind().as_str(), meta.namespace.clone(), meta.name.clone())
    }

    fn resource_version(&self) -> ResourceVersion {
        ResourceVersion::new(self.meta().resource_version)
    }

    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.meta_mut().resource_version = version.as_u64();
    }
}

/// A concrete kind that can be moved in and out of a [`Resource`].
pub trait TypedResource: Sized {
    /// The kind.
    const KIND: Kind;

    /// Extracts the typed object, or `None` for another kind.
    fn from_resource(resource: Resource) -> Option<Self>;

    /// Borrows the typed object, or `None` for another kind.
    fn from_ref(resource: &Resource) -> Option<&Self>;

    /// The object's metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// The object's store key.
    fn resource_key(&self) -> ResourceKey {
        let meta = self.metadata();
        ResourceKey::new(Self::KIND.as_str(), meta.namespace.clone(), meta.name.clone())
    }

    /// The object's own identity as a reference.
    fn reference(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(meta.namespace.clone(), meta.name.clone())
    }

    /// Wraps the object.
    fn into_resource(self) -> Resource;
}

macro_rules! typed_resource {
    ($($ty:ident),* $(,)?) => {
        $(
            impl TypedResource for $ty {
                const KIND: Kind = Kind::$ty;

                fn from_resource(resource: Resource) -> Option<Self> {
                    match resource {
                        Resource::$ty(r) => Some(r),
                        _ => None,
                    }
                }

                fn from_ref(resource: &Resource) -> Option<&Self> {
                    match resource {
                        Resource::$ty(r) => Some(r),
                        _ => None,
                    }
                }

                fn metadata(&self) -> &ObjectMeta {
                    &self.metadata
                }

                fn into_resource(self) -> Resource {
                    Resource::$ty(self)
                }
            }

            impl From<$ty> for Resource {
                fn from(value: $ty) -> Self {
                    Resource::$ty(value)
                }
            }
        )*
    };
}

typed_resource!(
    Service,
    AddressGroup,
    AddressGroupBinding,
    AddressGroupBindingPolicy,
    AddressGroupPortMapping,
    ServiceAlias,
    RuleS2S,
    IeAgAgRule,
    Network,
    NetworkBinding,
);

/// Typed lookups over any resource reader.
pub trait TypedReader {
    /// Reads one object of kind `T`.
    fn get_as<T: TypedResource>(&self, object: &ObjectRef) -> StoreResult<Option<T>>;

    /// Lists every object of kind `T`, optionally in one namespace.
    fn list_as<T: TypedResource>(&self, namespace: Option<&str>) -> StoreResult<Vec<T>>;
}

impl<S: Reader<Resource> + ?Sized> TypedReader for S {
    fn get_as<T: TypedResource>(&self, object: &ObjectRef) -> StoreResult<Option<T>> {
        Ok(self.get(&object.key(T::KIND))?.and_then(T::from_resource))
    }

    fn list_as<T: TypedResource>(&self, namespace: Option<&str>) -> StoreResult<Vec<T>> {
        Ok(self
            .list(T::KIND.as_str(), namespace)?
            .into_iter()
            .filter_map(T::from_resource)
            .collect())
    }
}
