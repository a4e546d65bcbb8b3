//! Declarative reference graph.
//!
//! Every reference field in the model is one [`ReferenceEdge`]. Delete
//! handling walks the table generically: `Block` edges veto the delete,
//! `Cascade` edges delete the referrer with the target, and `Recompile`
//! edges are resolved by recompiling the rules that hold them.

use netguard_store::{Reader, Record};
use std::fmt;

use crate::error::{NetguardError, NetguardResult};
use crate::model::{Kind, ObjectRef, Resource};

/// What happens to a referrer when its target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// The referrer prevents the delete.
    Block,
    /// The referrer is deleted with the target.
    Cascade,
    /// The referrer is derived and disappears on recompilation.
    Recompile,
}

/// One reference field: `from.field -> to`.
#[derive(Clone, Copy)]
pub struct ReferenceEdge {
    /// Referencing kind.
    pub from: Kind,
    /// Field name, as serialized.
    pub field: &'static str,
    /// Referenced kind.
    pub to: Kind,
    /// Delete behavior.
    pub on_delete: OnDelete,
    extract: fn(&Resource) -> Option<ObjectRef>,
}

impl ReferenceEdge {
    /// The reference held by `referrer` through this edge, namespace resolved.
    #[must_use]
    pub fn target_of(&self, referrer: &Resource) -> Option<ObjectRef> {
        (self.extract)(referrer)
    }
}

impl fmt::Debug for ReferenceEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceEdge")
            .field("from", &self.from)
            .field("field", &self.field)
            .field("to", &self.to)
            .field("on_delete", &self.on_delete)
            .finish()
    }
}

fn alias_service(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::ServiceAlias(a) => Some(a.service()),
        _ => None,
    }
}

fn binding_service(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::AddressGroupBinding(b) => Some(b.service()),
        _ => None,
    }
}

fn binding_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::AddressGroupBinding(b) => Some(b.address_group()),
        _ => None,
    }
}

fn policy_service(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::AddressGroupBindingPolicy(p) => Some(p.service()),
        _ => None,
    }
}

fn policy_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::AddressGroupBindingPolicy(p) => Some(p.address_group()),
        _ => None,
    }
}

fn port_mapping_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::AddressGroupPortMapping(m) => Some(ObjectRef::new(
            m.metadata.namespace.clone(),
            m.metadata.name.clone(),
        )),
        _ => None,
    }
}

fn rule_local_alias(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::RuleS2S(rule) => Some(rule.local_alias()),
        _ => None,
    }
}

fn rule_remote_alias(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::RuleS2S(rule) => Some(rule.remote_alias()),
        _ => None,
    }
}

fn compiled_local_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::IeAgAgRule(rule) => Some(rule.spec.address_group_local.clone()),
        _ => None,
    }
}

fn compiled_remote_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::IeAgAgRule(rule) => Some(rule.spec.address_group.clone()),
        _ => None,
    }
}

fn compiled_owner(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::IeAgAgRule(rule) => Some(rule.owner.clone()),
        _ => None,
    }
}

fn network_binding_network(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::NetworkBinding(b) => Some(b.network()),
        _ => None,
    }
}

fn network_binding_group(r: &Resource) -> Option<ObjectRef> {
    match r {
        Resource::NetworkBinding(b) => Some(b.address_group()),
        _ => None,
    }
}

const fn edge(
    from: Kind,
    field: &'static str,
    to: Kind,
    on_delete: OnDelete,
    extract: fn(&Resource) -> Option<ObjectRef>,
) -> ReferenceEdge {
    ReferenceEdge {
        from,
        field,
        to,
        on_delete,
        extract,
    }
}

/// Every reference field in the model.
pub static REFERENCE_GRAPH: &[ReferenceEdge] = &[
    edge(Kind::ServiceAlias, "serviceRef", Kind::Service, OnDelete::Block, alias_service),
    edge(Kind::AddressGroupBinding, "serviceRef", Kind::Service, OnDelete::Block, binding_service),
    edge(Kind::AddressGroupBinding, "addressGroupRef", Kind::AddressGroup, OnDelete::Cascade, binding_group),
    edge(Kind::AddressGroupBindingPolicy, "serviceRef", Kind::Service, OnDelete::Block, policy_service),
    edge(Kind::AddressGroupBindingPolicy, "addressGroupRef", Kind::AddressGroup, OnDelete::Cascade, policy_group),
    edge(Kind::AddressGroupPortMapping, "metadata.name", Kind::AddressGroup, OnDelete::Cascade, port_mapping_group),
    edge(Kind::RuleS2S, "serviceLocalRef", Kind::ServiceAlias, OnDelete::Block, rule_local_alias),
    edge(Kind::RuleS2S, "serviceRef", Kind::ServiceAlias, OnDelete::Block, rule_remote_alias),
    edge(Kind::IeAgAgRule, "addressGroupLocal", Kind::AddressGroup, OnDelete::Recompile, compiled_local_group),
    edge(Kind::IeAgAgRule, "addressGroup", Kind::AddressGroup, OnDelete::Recompile, compiled_remote_group),
    edge(Kind::IeAgAgRule, "owner", Kind::RuleS2S, OnDelete::Cascade, compiled_owner),
    edge(Kind::NetworkBinding, "networkRef", Kind::Network, OnDelete::Block, network_binding_network),
    edge(Kind::NetworkBinding, "addressGroupRef", Kind::AddressGroup, OnDelete::Cascade, network_binding_group),
];

/// Edges pointing at `kind`.
pub fn edges_into(kind: Kind) -> impl Iterator<Item = &'static ReferenceEdge> {
    REFERENCE_GRAPH.iter().filter(move |e| e.to == kind)
}

/// Objects referencing `target` (of kind `kind`) through edges with the
/// given delete behavior, in edge then key order.
pub fn referrers(
    reader: &dyn Reader<Resource>,
    kind: Kind,
    target: &ObjectRef,
    on_delete: OnDelete,
) -> NetguardResult<Vec<(&'static ReferenceEdge, Resource)>> {
    let mut found = Vec::new();
    for edge in edges_into(kind).filter(|e| e.on_delete == on_delete) {
        for referrer in reader.list(edge.from.as_str(), None)? {
            if edge.target_of(&referrer).as_ref() == Some(target) {
                found.push((edge, referrer));
            }
        }
    }
    Ok(found)
}

/// Fails with a dependency error if anything references `target` through
/// an edge with the given delete behavior.
pub fn ensure_unreferenced(
    reader: &dyn Reader<Resource>,
    kind: Kind,
    target: &ObjectRef,
    on_delete: OnDelete,
) -> NetguardResult<()> {
    let found = referrers(reader, kind, target, on_delete)?;
    if found.is_empty() {
        return Ok(());
    }
    let mut names: Vec<String> = found.iter().map(|(_, r)| r.key().to_string()).collect();
    names.sort();
    names.dedup();
    Err(NetguardError::dependency(target.key(kind), names))
}

/// Reverse-reference scan used before a delete: fails naming every object
/// that holds a blocking reference to `target`.
///
/// Cascading referrers are not reported; they are deleted with the target.
pub fn check_dependencies(
    reader: &dyn Reader<Resource>,
    kind: Kind,
    target: &ObjectRef,
) -> NetguardResult<()> {
    ensure_unreferenced(reader, kind, target, OnDelete::Block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddressGroupBinding, RuleS2S, Service, ServiceAlias, Traffic};
    use std::collections::HashSet;

    #[test]
    fn edges_are_unique_per_field() {
        let mut seen = HashSet::new();
        for edge in REFERENCE_GRAPH {
            assert!(seen.insert((edge.from, edge.field)), "duplicate edge {edge:?}");
        }
    }

    #[test]
    fn extractors_match_their_kind() {
        let alias: Resource = ServiceAlias::new("ns", "a", ObjectRef::new("", "web")).into();
        let rule: Resource = RuleS2S::new(
            "ns",
            "r",
            Traffic::Ingress,
            ObjectRef::new("", "a"),
            ObjectRef::new("other", "b"),
        )
        .into();
        let binding: Resource = AddressGroupBinding::new(
            "ns",
            "b",
            ObjectRef::new("", "web"),
            ObjectRef::new("", "ag"),
        )
        .into();
        let service: Resource = Service::new("ns", "web").into();

        for edge in REFERENCE_GRAPH {
            for obj in [&alias, &rule, &binding, &service] {
                let extracted = edge.target_of(obj);
                assert_eq!(extracted.is_some(), obj.kind() == edge.from, "{edge:?}");
            }
        }

        let remote = REFERENCE_GRAPH
            .iter()
            .find(|e| e.from == Kind::RuleS2S && e.field == "serviceRef")
            .unwrap();
        assert_eq!(remote.target_of(&rule), Some(ObjectRef::new("other", "b")));
    }

    #[test]
    fn service_deletes_are_blocked_not_cascaded() {
        assert!(edges_into(Kind::Service).all(|e| e.on_delete == OnDelete::Block));
        assert!(edges_into(Kind::AddressGroup)
            .filter(|e| e.from == Kind::AddressGroupBinding)
            .all(|e| e.on_delete == OnDelete::Cascade));
    }
}
