//! Reverse lookups over the binding and alias graph.
//!
//! References are stored on the referrer only, so every reverse question
//! ("which aliases point at this service?") is a scan of the referrer kind.

use netguard_store::Reader;
use std::collections::BTreeSet;

use crate::error::NetguardResult;
use crate::model::{
    AddressGroupBinding, AddressGroupBindingPolicy, ObjectRef, Resource, RuleS2S, ServiceAlias,
    TypedReader, TypedResource,
};

/// Aliases pointing at `service`.
pub(crate) fn aliases_of_service(
    reader: &dyn Reader<Resource>,
    service: &ObjectRef,
) -> NetguardResult<Vec<ServiceAlias>> {
    Ok(reader
        .list_as::<ServiceAlias>(None)?
        .into_iter()
        .filter(|a| &a.service() == service)
        .collect())
}

/// RuleS2S objects using `alias` on either side.
pub(crate) fn rules_using_alias(
    reader: &dyn Reader<Resource>,
    alias: &ObjectRef,
) -> NetguardResult<BTreeSet<ObjectRef>> {
    Ok(reader
        .list_as::<RuleS2S>(None)?
        .into_iter()
        .filter(|r| &r.local_alias() == alias || &r.remote_alias() == alias)
        .map(|r| r.reference())
        .collect())
}

/// RuleS2S objects whose inputs include `service`, through any alias.
pub(crate) fn rules_of_service(
    reader: &dyn Reader<Resource>,
    service: &ObjectRef,
) -> NetguardResult<BTreeSet<ObjectRef>> {
    let mut rules = BTreeSet::new();
    for alias in aliases_of_service(reader, service)? {
        let alias_ref = ObjectRef::new(alias.metadata.namespace, alias.metadata.name);
        rules.extend(rules_using_alias(reader, &alias_ref)?);
    }
    Ok(rules)
}

/// Bindings of `service`, in key order.
pub(crate) fn bindings_of_service(
    reader: &dyn Reader<Resource>,
    service: &ObjectRef,
) -> NetguardResult<Vec<AddressGroupBinding>> {
    Ok(reader
        .list_as::<AddressGroupBinding>(None)?
        .into_iter()
        .filter(|b| &b.service() == service)
        .collect())
}

/// Address groups `service` is bound to.
pub(crate) fn address_groups_of_service(
    reader: &dyn Reader<Resource>,
    service: &ObjectRef,
) -> NetguardResult<BTreeSet<ObjectRef>> {
    Ok(bindings_of_service(reader, service)?
        .iter()
        .map(AddressGroupBinding::address_group)
        .collect())
}

/// Policies approving `service` into `group`.
pub(crate) fn policies_for(
    reader: &dyn Reader<Resource>,
    service: &ObjectRef,
    group: &ObjectRef,
) -> NetguardResult<Vec<AddressGroupBindingPolicy>> {
    Ok(reader
        .list_as::<AddressGroupBindingPolicy>(Some(&group.namespace))?
        .into_iter()
        .filter(|p| &p.service() == service && &p.address_group() == group)
        .collect())
}
