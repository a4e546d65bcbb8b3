//! Rule compiler.
//!
//! Derives the [`IeAgAgRule`] set implied by a [`RuleS2S`] and the current
//! binding graph, then stages the minimal diff against the rules the
//! RuleS2S recorded last time.
//!
//! For a rule between services A (local) and B (remote):
//!
//! 1. both aliases are resolved to services
//! 2. `AGlocal` is every address group in the rule's namespace that A is
//!    bound to, `AGremote` every group B is bound to
//! 3. the port source is A for `INGRESS` and B for `EGRESS`
//! 4. every `(agLocal, agRemote)` pair and declared port yields a candidate
//!    keyed by `(transport, agLocal, agRemote)`; candidates sharing a key
//!    have their ranges coalesced
//! 5. each merged rule is named by hashing its owner and key, so unchanged
//!    inputs always produce the same identities

use netguard_store::{Reader, Transaction};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{NetguardError, NetguardResult};
use crate::kinds::{create_derived, update_derived};
use crate::lookup::address_groups_of_service;
use crate::model::{
    IeAgAgRule, IeAgAgRuleSpec, Kind, ObjectMeta, ObjectRef, Protocol, Resource, RuleAction,
    RuleS2S, Service, ServiceAlias, Traffic, TypedReader, TypedResource, OWNER_LABEL,
};
use crate::ports::{coalesce, PortRange, PortSpec};

/// What one recompilation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileDiff {
    /// The RuleS2S that was compiled.
    pub rule: ObjectRef,
    /// Compiled rules created.
    pub created: Vec<ObjectRef>,
    /// Compiled rules whose ports, priority or trace flag changed.
    pub updated: Vec<ObjectRef>,
    /// Compiled rules no longer implied, deleted.
    pub deleted: Vec<ObjectRef>,
    /// Compiled rules left untouched.
    pub unchanged: Vec<ObjectRef>,
}

impl CompileDiff {
    fn new(rule: ObjectRef) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Rules that exist after the diff and were written by it.
    pub fn written(&self) -> impl Iterator<Item = &ObjectRef> {
        self.created.iter().chain(self.updated.iter())
    }
}

/// Deterministic name of a compiled rule.
///
/// The name is `<traffic>-<transport>-<16 hex digits>`, the hex digits
/// being a SHA-256 prefix over the owner and the rule key.
#[must_use]
pub fn compiled_rule_name(
    owner: &ObjectRef,
    traffic: Traffic,
    transport: Protocol,
    local: &ObjectRef,
    remote: &ObjectRef,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        owner.to_string(),
        traffic.to_string(),
        transport.to_string(),
        local.to_string(),
        remote.to_string(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{}-{hex}", traffic.short(), transport.short())
}

type RuleKey = (Protocol, ObjectRef, ObjectRef);

/// Compiles RuleS2S objects into address-group rules.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    priority: i32,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl RuleCompiler {
    /// Creates a compiler using the configured rule priority.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            priority: config.default_rule_priority,
        }
    }

    /// Computes the rules `rule` implies, sorted by identity. Reads only.
    ///
    /// # Errors
    ///
    /// Fails with [`NetguardError::Compile`] if an alias or service does not
    /// resolve or a port string does not parse.
    pub fn compile(
        &self,
        reader: &dyn Reader<Resource>,
        rule: &RuleS2S,
    ) -> NetguardResult<Vec<IeAgAgRule>> {
        let owner = rule.reference();
        let local = resolve(reader, &owner, &rule.local_alias())?;
        let remote = resolve(reader, &owner, &rule.remote_alias())?;

        let namespace = &rule.metadata.namespace;
        let ag_local: BTreeSet<ObjectRef> = address_groups_of_service(reader, &local.reference())?
            .into_iter()
            .filter(|ag| &ag.namespace == namespace)
            .collect();
        let ag_remote = address_groups_of_service(reader, &remote.reference())?;

        let port_source = match rule.spec.traffic {
            Traffic::Ingress => &local,
            Traffic::Egress => &remote,
        };

        let mut candidates: BTreeMap<RuleKey, Vec<PortRange>> = BTreeMap::new();
        for agl in &ag_local {
            for agr in &ag_remote {
                for port in &port_source.spec.ingress_ports {
                    let ranges = port.ranges().map_err(|e| {
                        NetguardError::compile(
                            &owner,
                            format!("service {}: {e}", port_source.reference()),
                        )
                    })?;
                    candidates
                        .entry((port.protocol, agl.clone(), agr.clone()))
                        .or_default()
                        .extend(ranges);
                }
            }
        }

        let mut rules: Vec<IeAgAgRule> = candidates
            .into_iter()
            .map(|((transport, agl, agr), ranges)| self.build(rule, &owner, transport, agl, agr, ranges))
            .collect();
        rules.sort_by(|a, b| a.reference().cmp(&b.reference()));
        Ok(rules)
    }

    fn build(
        &self,
        rule: &RuleS2S,
        owner: &ObjectRef,
        transport: Protocol,
        agl: ObjectRef,
        agr: ObjectRef,
        ranges: Vec<PortRange>,
    ) -> IeAgAgRule {
        let traffic = rule.spec.traffic;
        let name = compiled_rule_name(owner, traffic, transport, &agl, &agr);
        let mut metadata = ObjectMeta::new(agl.namespace.clone(), name);
        metadata
            .labels
            .insert(OWNER_LABEL.to_string(), owner.to_string());
        IeAgAgRule {
            metadata,
            spec: IeAgAgRuleSpec {
                transport,
                traffic,
                action: RuleAction::Accept,
                address_group_local: agl,
                address_group: agr,
                ports: coalesce(ranges).into_iter().map(PortSpec::from).collect(),
                priority: self.priority,
                trace: rule.spec.trace,
            },
            owner: owner.clone(),
        }
    }

    /// Recompiles `rule` inside `txn` and stages the diff: new rules are
    /// created, changed ones updated, rules no longer implied deleted, and
    /// the RuleS2S's `ieAgAgRuleRefs` replaced by the new set.
    ///
    /// A RuleS2S that no longer exists compiles to an empty diff; its rules
    /// are removed by the owner cascade.
    ///
    /// # Errors
    ///
    /// Fails if compilation fails or a rule with a colliding identity is
    /// owned by another RuleS2S.
    pub fn recompile(
        &self,
        txn: &mut Transaction<Resource>,
        rule_ref: &ObjectRef,
    ) -> NetguardResult<CompileDiff> {
        let mut diff = CompileDiff::new(rule_ref.clone());
        let Some(rule) = txn.get_as::<RuleS2S>(rule_ref)? else {
            return Ok(diff);
        };

        let desired = self.compile(&*txn, &rule)?;
        let mut refs = Vec::with_capacity(desired.len());

        for compiled in desired {
            let id = compiled.reference();
            refs.push(id.clone());
            match txn.get_as::<IeAgAgRule>(&id)? {
                None => {
                    create_derived(txn, compiled.into_resource())?;
                    diff.created.push(id);
                }
                Some(existing) if existing.owner != compiled.owner => {
                    return Err(NetguardError::compile(
                        rule_ref,
                        format!("compiled rule {id} is owned by {}", existing.owner),
                    ));
                }
                Some(existing) if existing.spec == compiled.spec => {
                    diff.unchanged.push(id);
                }
                Some(existing) => {
                    let mut next = existing.clone();
                    next.spec = compiled.spec;
                    next.metadata.labels.extend(compiled.metadata.labels);
                    update_derived(txn, &existing.into_resource(), next.into_resource())?;
                    diff.updated.push(id);
                }
            }
        }

        let keep: BTreeSet<&ObjectRef> = refs.iter().collect();
        for stale in rule.ie_ag_ag_rule_refs.iter().filter(|r| !keep.contains(r)) {
            let owned = txn
                .get_as::<IeAgAgRule>(stale)?
                .is_some_and(|existing| &existing.owner == rule_ref);
            if owned {
                txn.delete(&stale.key(Kind::IeAgAgRule))?;
                diff.deleted.push(stale.clone());
            }
        }

        if rule.ie_ag_ag_rule_refs != refs {
            let mut updated = rule.clone();
            updated.ie_ag_ag_rule_refs = refs;
            update_derived(txn, &rule.into_resource(), updated.into_resource())?;
        }

        debug!(
            rule = %rule_ref,
            created = diff.created.len(),
            updated = diff.updated.len(),
            deleted = diff.deleted.len(),
            unchanged = diff.unchanged.len(),
            "recompiled rule"
        );
        Ok(diff)
    }
}

fn resolve(
    reader: &dyn Reader<Resource>,
    owner: &ObjectRef,
    alias_ref: &ObjectRef,
) -> NetguardResult<Service> {
    let alias = reader
        .get_as::<ServiceAlias>(alias_ref)?
        .ok_or_else(|| NetguardError::compile(owner, format!("service alias {alias_ref} not found")))?;
    let service_ref = alias.service();
    reader.get_as::<Service>(&service_ref)?.ok_or_else(|| {
        NetguardError::compile(
            owner,
            format!("service alias {alias_ref} points at missing service {service_ref}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddressGroup, AddressGroupBinding};
    use netguard_store::{MemoryStore, ResourceStore};

    fn seed(txn: &mut Transaction<Resource>, objects: Vec<Resource>) {
        for obj in objects {
            txn.create(obj).unwrap();
        }
    }

    fn scenario(traffic: Traffic) -> (MemoryStore<Resource>, RuleS2S) {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let rule = RuleS2S::new(
            "ns",
            "a-to-b",
            traffic,
            ObjectRef::new("", "alias-a"),
            ObjectRef::new("", "alias-b"),
        );
        seed(
            &mut txn,
            vec![
                Service::new("ns", "a").with_port(Protocol::Tcp, "80").into(),
                Service::new("ns", "b")
                    .with_port(Protocol::Tcp, "8080")
                    .with_port(Protocol::Udp, "53")
                    .into(),
                ServiceAlias::new("ns", "alias-a", ObjectRef::new("", "a")).into(),
                ServiceAlias::new("ns", "alias-b", ObjectRef::new("", "b")).into(),
                AddressGroup::new("ns", "ag1", RuleAction::Drop).into(),
                AddressGroup::new("ns", "ag2", RuleAction::Drop).into(),
                AddressGroupBinding::new(
                    "ns",
                    "a-ag1",
                    ObjectRef::new("", "a"),
                    ObjectRef::new("", "ag1"),
                )
                .into(),
                AddressGroupBinding::new(
                    "ns",
                    "b-ag2",
                    ObjectRef::new("", "b"),
                    ObjectRef::new("", "ag2"),
                )
                .into(),
                rule.clone().into(),
            ],
        );
        store.commit(&mut txn).unwrap();
        (store, rule)
    }

    #[test]
    fn ingress_uses_local_ports() {
        let (store, rule) = scenario(Traffic::Ingress);
        let rules = RuleCompiler::default()
            .compile(&store.snapshot(), &rule)
            .unwrap();
        assert_eq!(rules.len(), 1);
        let compiled = &rules[0];
        assert_eq!(compiled.spec.transport, Protocol::Tcp);
        assert_eq!(compiled.spec.address_group_local, ObjectRef::new("ns", "ag1"));
        assert_eq!(compiled.spec.address_group, ObjectRef::new("ns", "ag2"));
        assert_eq!(compiled.spec.ports, vec![PortSpec::Port(80)]);
        assert_eq!(compiled.spec.action, RuleAction::Accept);
        assert_eq!(compiled.owner, ObjectRef::new("ns", "a-to-b"));
        assert_eq!(
            compiled.metadata.labels.get(OWNER_LABEL).map(String::as_str),
            Some("ns/a-to-b")
        );
    }

    #[test]
    fn egress_uses_remote_ports() {
        let (store, rule) = scenario(Traffic::Egress);
        let rules = RuleCompiler::default()
            .compile(&store.snapshot(), &rule)
            .unwrap();
        let transports: Vec<Protocol> = rules.iter().map(|r| r.spec.transport).collect();
        assert_eq!(rules.len(), 2);
        assert!(transports.contains(&Protocol::Tcp));
        assert!(transports.contains(&Protocol::Udp));
        assert!(rules.iter().all(|r| r.spec.traffic == Traffic::Egress));
    }

    #[test]
    fn unbound_side_compiles_to_nothing() {
        let (store, rule) = scenario(Traffic::Ingress);
        let mut txn = store.begin().unwrap();
        txn.delete(&ObjectRef::new("ns", "b-ag2").key(Kind::AddressGroupBinding))
            .unwrap();
        let rules = RuleCompiler::default().compile(&txn, &rule).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn local_groups_outside_the_rule_namespace_are_ignored() {
        let (store, rule) = scenario(Traffic::Ingress);
        let mut txn = store.begin().unwrap();
        seed(
            &mut txn,
            vec![
                AddressGroup::new("infra", "shared", RuleAction::Drop).into(),
                AddressGroupBinding::new(
                    "ns",
                    "a-shared",
                    ObjectRef::new("", "a"),
                    ObjectRef::new("infra", "shared"),
                )
                .into(),
            ],
        );
        store.commit(&mut txn).unwrap();

        let rules = RuleCompiler::default()
            .compile(&store.snapshot(), &rule)
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].spec.address_group_local, ObjectRef::new("ns", "ag1"));
    }

    #[test]
    fn missing_alias_is_a_compile_error() {
        let (store, mut rule) = scenario(Traffic::Ingress);
        rule.spec.service_ref = ObjectRef::new("", "nope");
        let err = RuleCompiler::default()
            .compile(&store.snapshot(), &rule)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Compile { .. }));
    }

    #[test]
    fn recompile_is_idempotent() {
        let (store, rule) = scenario(Traffic::Ingress);
        let compiler = RuleCompiler::default();

        let mut txn = store.begin().unwrap();
        let first = compiler.recompile(&mut txn, &rule.reference()).unwrap();
        assert_eq!(first.created.len(), 1);
        store.commit(&mut txn).unwrap();

        let mut txn = store.begin().unwrap();
        let second = compiler.recompile(&mut txn, &rule.reference()).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged, first.created);
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn recompile_deletes_stale_rules() {
        let (store, rule) = scenario(Traffic::Ingress);
        let compiler = RuleCompiler::default();
        let mut txn = store.begin().unwrap();
        let created = compiler.recompile(&mut txn, &rule.reference()).unwrap().created;
        store.commit(&mut txn).unwrap();

        let mut txn = store.begin().unwrap();
        txn.delete(&ObjectRef::new("ns", "b-ag2").key(Kind::AddressGroupBinding))
            .unwrap();
        let diff = compiler.recompile(&mut txn, &rule.reference()).unwrap();
        assert_eq!(diff.deleted, created);
        let stored = txn.get_as::<RuleS2S>(&rule.reference()).unwrap().unwrap();
        assert!(stored.ie_ag_ag_rule_refs.is_empty());
    }

    #[test]
    fn names_are_deterministic_and_owner_scoped() {
        let ag1 = ObjectRef::new("ns", "ag1");
        let ag2 = ObjectRef::new("ns", "ag2");
        let owner = ObjectRef::new("ns", "r1");
        let a = compiled_rule_name(&owner, Traffic::Ingress, Protocol::Tcp, &ag1, &ag2);
        let b = compiled_rule_name(&owner, Traffic::Ingress, Protocol::Tcp, &ag1, &ag2);
        assert_eq!(a, b);
        assert!(a.starts_with("ing-tcp-"));
        assert_eq!(a.len(), "ing-tcp-".len() + 16);

        let other = ObjectRef::new("ns", "r2");
        assert_ne!(
            a,
            compiled_rule_name(&other, Traffic::Ingress, Protocol::Tcp, &ag1, &ag2)
        );
        assert_ne!(
            a,
            compiled_rule_name(&owner, Traffic::Ingress, Protocol::Tcp, &ag2, &ag1)
        );
    }
}
