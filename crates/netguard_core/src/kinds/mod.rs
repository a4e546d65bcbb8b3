//! Capability implementations for every kind, and the standard registry.

mod address_group;
mod network;
mod rule;
mod service;

use netguard_store::{Reader, ResourceKey, Transaction};

use crate::error::{NetguardError, NetguardResult};
use crate::model::{
    AddressGroup, AddressGroupBinding, AddressGroupBindingPolicy, AddressGroupPortMapping,
    IeAgAgRule, Network, NetworkBinding, ObjectRef, Resource, RuleS2S, Service, ServiceAlias,
    TypedReader, TypedResource,
};
use crate::registry::KindRegistry;

impl KindRegistry {
    /// A registry with every built-in kind and its capabilities.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = KindRegistry::new();
        registry.register::<Service>().compilable().with_hooks();
        registry.register::<AddressGroup>().with_hooks();
        registry
            .register::<AddressGroupBinding>()
            .compilable()
            .reconcilable()
            .with_hooks();
        registry.register::<AddressGroupBindingPolicy>().reconcilable();
        registry.register::<AddressGroupPortMapping>();
        registry.register::<ServiceAlias>().compilable().reconcilable();
        registry.register::<RuleS2S>().compilable().reconcilable();
        registry.register::<IeAgAgRule>();
        registry.register::<Network>();
        registry
            .register::<NetworkBinding>()
            .reconcilable()
            .with_hooks();
        registry
    }
}

/// Reads a referenced object, failing with a reference error if it is gone.
pub(crate) fn require<T: TypedResource>(
    reader: &dyn Reader<Resource>,
    referrer: &ResourceKey,
    target: &ObjectRef,
) -> NetguardResult<T> {
    reader
        .get_as::<T>(target)?
        .ok_or_else(|| NetguardError::reference(referrer, target.key(T::KIND)))
}

/// Rejects a change to an immutable reference.
pub(crate) fn ensure_unchanged<V: PartialEq + std::fmt::Display>(
    object: &ResourceKey,
    field: &str,
    old: &V,
    new: &V,
) -> NetguardResult<()> {
    if old == new {
        Ok(())
    } else {
        Err(NetguardError::validation(
            object,
            format!("{field} is immutable (was {old}, got {new})"),
        ))
    }
}

/// Stages a control-plane-owned object for creation.
pub(crate) fn create_derived(txn: &mut Transaction<Resource>, mut obj: Resource) -> NetguardResult<()> {
    obj.meta_mut().stamp_created();
    txn.create(obj)?;
    Ok(())
}

/// Stages a modified copy of `previous`. Skips identical writes and bumps
/// the generation only when the desired state changed.
pub(crate) fn update_derived(
    txn: &mut Transaction<Resource>,
    previous: &Resource,
    mut obj: Resource,
) -> NetguardResult<()> {
    if &obj == previous {
        return Ok(());
    }
    if !obj.spec_eq(previous) {
        obj.meta_mut().generation = previous.meta().generation + 1;
    }
    txn.update(obj)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = KindRegistry::standard();
        assert_eq!(registry.len(), Kind::ALL.len());
        for kind in Kind::ALL {
            assert!(registry.get(kind.as_str()).is_some(), "{kind} missing");
        }
    }

    #[test]
    fn compilable_kinds() {
        let registry = KindRegistry::standard();
        let compilable: Vec<Kind> = registry
            .kinds()
            .filter(|k| registry.get(k.as_str()).is_some_and(|e| e.is_compilable()))
            .collect();
        assert_eq!(compilable.len(), 4);
        for kind in [
            Kind::Service,
            Kind::ServiceAlias,
            Kind::AddressGroupBinding,
            Kind::RuleS2S,
        ] {
            assert!(compilable.contains(&kind));
        }
    }
}
