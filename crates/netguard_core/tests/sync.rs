//! Integration tests for create, update and upsert syncs.

use netguard_core::{
    AddressGroupPortMapping, ConditionType, EngineConfig, IeAgAgRule, Kind, NetguardError,
    ObjectRef, Operation, PortRange, PortSpec, Protocol, Resource, RuleS2S, Service,
    ServiceAlias, Traffic, TypedResource,
};
use netguard_store::{ChangeType, Record, ResourceVersion};
use netguard_testkit::prelude::*;
use proptest::prelude::*;

fn web_db_rule() -> Resource {
    scenarios::rule("shop", "web-db", Traffic::Ingress, "web", "db").into()
}

#[test]
fn rule_compiles_to_one_address_group_rule() {
    init_tracing();
    with_plane(|plane| {
        plane.create(scenarios::web_and_db("shop"));
        let outcome = plane.create(vec![web_db_rule()]);

        let rules = plane.compiled_rules();
        assert_eq!(rules.len(), 1);
        let compiled = &rules[0];
        assert_eq!(compiled.spec.transport, Protocol::Tcp);
        assert_eq!(compiled.spec.traffic, Traffic::Ingress);
        assert_eq!(compiled.spec.address_group_local, ObjectRef::new("shop", "ag-web"));
        assert_eq!(compiled.spec.address_group, ObjectRef::new("shop", "ag-db"));
        assert_eq!(compiled.spec.ports, vec![PortSpec::Port(80)]);

        let rule: RuleS2S = plane.stored("shop", "web-db");
        assert_eq!(rule.ie_ag_ag_rule_refs, vec![compiled.reference()]);
        for condition in ConditionType::ALL {
            assert!(rule.metadata.is_condition_true(condition), "{condition:?}");
        }

        for condition in ConditionType::ALL {
            assert!(compiled.metadata.is_condition_true(condition), "{condition:?}");
        }
        assert_eq!(compiled.metadata.observed_generation, compiled.metadata.generation);

        let reconciled = outcome.reconciled.expect("mutate syncs reconcile inline");
        assert!(reconciled.failed.is_empty());
        assert!(reconciled
            .updated
            .contains(&ObjectRef::new("shop", "web-db").key(Kind::RuleS2S)));
        assert!(!reconciled
            .updated
            .contains(&compiled.reference().key(Kind::IeAgAgRule)));
    });
}

#[test]
fn egress_rule_takes_remote_ports() {
    with_plane(|plane| {
        plane.create(scenarios::web_and_db("shop"));
        plane.create(vec![
            scenarios::rule("shop", "web-to-db", Traffic::Egress, "web", "db").into(),
        ]);

        let rules = plane.compiled_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].spec.traffic, Traffic::Egress);
        assert_eq!(rules[0].spec.ports, vec![PortSpec::Port(5432)]);
    });
}

#[test]
fn adding_a_port_recompiles_the_rule() {
    with_plane(|plane| {
        plane.create(scenarios::web_and_db("shop"));
        plane.create(vec![web_db_rule()]);
        let before = plane.compiled_rules();

        let outcome = plane.upsert(vec![Service::new("shop", "web")
            .with_port(Protocol::Tcp, "80")
            .with_port(Protocol::Tcp, "443")
            .into()]);

        let after = plane.compiled_rules();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].reference(), before[0].reference());
        assert_eq!(after[0].spec.ports, vec![PortSpec::Port(80), PortSpec::Port(443)]);
        assert_eq!(outcome.compiled.len(), 1);
        assert_eq!(outcome.compiled[0].updated, vec![after[0].reference()]);

        let mapping: AddressGroupPortMapping = plane.stored("shop", "ag-web");
        assert_eq!(
            mapping.access_ports[0].tcp,
            vec![PortRange::single(80), PortRange::single(443)]
        );

        let web: Service = plane.stored("shop", "web");
        assert_eq!(web.metadata.generation, 2);
        assert_eq!(web.address_groups, vec![ObjectRef::new("shop", "ag-web")]);
    });
}

#[test]
fn adjacent_ports_are_coalesced() {
    with_plane(|plane| {
        plane.create(vec![scenarios::group("shop", "ag-web").into(), scenarios::group("shop", "ag-db").into()]);
        plane.create(scenarios::bound_service("shop", "web", "80-90,91,100", "ag-web"));
        plane.create(scenarios::bound_service("shop", "db", "5432", "ag-db"));
        plane.create(vec![web_db_rule()]);

        let rules = plane.compiled_rules();
        assert_eq!(
            rules[0].spec.ports,
            vec![
                PortSpec::PortRange(PortRange::new(80, 91)),
                PortSpec::Port(100)
            ]
        );
    });
}

#[test]
fn overlapping_ports_in_one_service_are_rejected() {
    with_plane(|plane| {
        let err = plane
            .apply(
                vec![Service::new("shop", "bad")
                    .with_port(Protocol::Tcp, "80-90")
                    .with_port(Protocol::Tcp, "85")
                    .into()],
                Operation::Create,
            )
            .unwrap_err();

        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");
        assert!(plane.find::<Service>("shop", "bad").is_none());
        assert_eq!(plane.store().current_version(), ResourceVersion::UNSET);
    });
}

#[test]
fn same_port_on_different_protocols_is_allowed() {
    with_plane(|plane| {
        plane.create(vec![Service::new("shop", "dns")
            .with_port(Protocol::Tcp, "53")
            .with_port(Protocol::Udp, "53")
            .into()]);
        assert!(plane.find::<Service>("shop", "dns").is_some());
    });
}

#[test]
fn conflicting_ports_in_one_group_are_rejected() {
    with_plane(|plane| {
        plane.create(vec![scenarios::group("shop", "ag").into()]);
        plane.create(scenarios::bound_service("shop", "a", "8080", "ag"));

        let err = plane
            .apply(scenarios::bound_service("shop", "b", "8000-8100", "ag"), Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");
        assert!(plane.find::<Service>("shop", "b").is_none());
    });
}

#[test]
fn failed_batch_writes_nothing() {
    with_plane(|plane| {
        let mut batch = scenarios::web_and_db("shop");
        batch.push(scenarios::rule("shop", "broken", Traffic::Ingress, "web", "missing").into());
        let version = plane.store().current_version();

        let err = plane.apply(batch, Operation::Create).unwrap_err();
        assert!(matches!(err, NetguardError::Reference { .. }), "{err}");
        assert_eq!(plane.store().current_version(), version);
        assert!(plane.find::<Service>("shop", "web").is_none());
    });
}

#[test]
fn reapplying_a_batch_changes_nothing() {
    with_plane(|plane| {
        let mut batch = scenarios::web_and_db("shop");
        batch.push(web_db_rule());
        plane.create(batch.clone());
        let version = plane.store().current_version();
        let rules = plane.compiled_rules();

        let outcome = plane.upsert(batch);
        assert!(outcome.changes.is_empty());
        assert!(outcome.compiled.iter().all(|d| d.is_noop()));
        assert_eq!(plane.compiled_rules(), rules);
        assert_eq!(plane.store().current_version(), version);
    });
}

#[test]
fn create_of_existing_object_conflicts() {
    with_plane(|plane| {
        plane.create(vec![Service::new("shop", "web").into()]);
        let err = plane
            .sync_with_retry(vec![Service::new("shop", "web").into()], Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Conflict { .. }));
        assert!(!err.is_retryable());
    });
}

#[test]
fn update_of_missing_object_fails() {
    with_plane(|plane| {
        let err = plane
            .apply(vec![Service::new("shop", "web").into()], Operation::Update)
            .unwrap_err();
        assert!(matches!(err, NetguardError::NotFound(_)));
    });
}

#[test]
fn stale_resource_version_conflicts() {
    with_plane(|plane| {
        plane.create(vec![Service::new("shop", "web").into()]);
        let mut stale = Service::new("shop", "web").with_port(Protocol::Tcp, "80");
        stale.metadata.resource_version = plane.store().current_version().as_u64() + 10;

        let err = plane
            .apply(vec![stale.into()], Operation::Update)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Conflict { retryable: false, .. }), "{err}");
    });
}

#[test]
fn derived_kinds_are_not_writable() {
    with_plane(|plane| {
        let mapping = AddressGroupPortMapping::for_group(&ObjectRef::new("shop", "ag"));
        let err = plane
            .apply(vec![mapping.into()], Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }));
    });
}

#[test]
fn rule_traffic_is_immutable() {
    with_plane(|plane| {
        plane.create(scenarios::web_and_db("shop"));
        plane.create(vec![web_db_rule()]);

        let flipped = scenarios::rule("shop", "web-db", Traffic::Egress, "web", "db");
        let err = plane
            .apply(vec![flipped.into()], Operation::Update)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");
    });
}

#[test]
fn repointing_an_alias_recompiles() {
    with_plane(|plane| {
        plane.create(scenarios::web_and_db("shop"));
        plane.create(vec![scenarios::group("shop", "ag-cache").into()]);
        plane.create(scenarios::bound_service("shop", "cache", "6379", "ag-cache"));
        plane.create(vec![web_db_rule()]);

        let outcome = plane.upsert(vec![
            ServiceAlias::new("shop", "db", ObjectRef::new("", "cache")).into(),
        ]);

        let rules = plane.compiled_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].spec.address_group, ObjectRef::new("shop", "ag-cache"));
        assert_eq!(outcome.compiled[0].created.len(), 1);
        assert_eq!(outcome.compiled[0].deleted.len(), 1);
    });
}

#[test]
fn cross_namespace_binding_needs_a_policy() {
    with_plane(|plane| {
        plane.create(vec![
            scenarios::group("infra", "shared").into(),
            scenarios::service("team-a", "web", "80").into(),
        ]);
        let group = ObjectRef::new("infra", "shared");
        let binding = scenarios::cross_binding("team-a", "web", &group);

        let err = plane
            .apply(vec![binding.clone().into()], Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");

        let policy = scenarios::policy(&group, &ObjectRef::new("team-a", "web"));
        plane.create(vec![binding.into(), policy.into()]);

        let web: Service = plane.stored("team-a", "web");
        assert_eq!(web.address_groups, vec![group]);
    });
}

#[test]
fn network_binding_marks_network_and_group() {
    with_plane(|plane| {
        plane.create(vec![scenarios::group("shop", "ag").into()]);
        plane.create(scenarios::bound_network("shop", "office", "10.0.0.0/24", "ag"));

        let network: netguard_core::Network = plane.stored("shop", "office");
        assert!(network.is_bound);
        assert_eq!(network.address_group_ref, Some(ObjectRef::new("shop", "ag")));
        let group: netguard_core::AddressGroup = plane.stored("shop", "ag");
        assert_eq!(group.networks.len(), 1);
        assert_eq!(group.networks[0].cidr, "10.0.0.0/24");

        let second = netguard_core::NetworkBinding::new(
            "shop",
            "office-again",
            ObjectRef::new("", "office"),
            ObjectRef::new("", "ag"),
        );
        let err = plane
            .apply(vec![second.into()], Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");
    });
}

#[test]
fn invalid_cidr_is_rejected() {
    with_plane(|plane| {
        let err = plane
            .apply(
                vec![netguard_core::Network::new("shop", "bad", "10.0.0.0/33").into()],
                Operation::Create,
            )
            .unwrap_err();
        assert!(matches!(err, NetguardError::Validation { .. }), "{err}");
    });
}

#[test]
fn dry_run_validates_without_writing() {
    with_plane(|plane| {
        plane
            .validate(scenarios::web_and_db("shop"), Operation::Create)
            .unwrap();
        assert_eq!(plane.store().current_version(), ResourceVersion::UNSET);

        let err = plane
            .validate(vec![web_db_rule()], Operation::Create)
            .unwrap_err();
        assert!(matches!(err, NetguardError::Reference { .. }), "{err}");
    });
}

#[test]
fn deferred_reconciliation_queues_objects() {
    let plane = TestPlane::with_config(EngineConfig::default().with_reconcile_after_sync(false));
    let outcome = plane.create(vec![Service::new("shop", "web").into()]);
    assert!(outcome.reconciled.is_none());

    let key = ObjectRef::new("shop", "web").key(Kind::Service);
    assert_eq!(plane.reconciler().pending(), vec![key.clone()]);
    let web: Service = plane.stored("shop", "web");
    assert!(web.metadata.conditions.is_empty());

    let report = plane.reconcile_pending();
    assert_eq!(report.updated, vec![key]);
    let web: Service = plane.stored("shop", "web");
    assert!(web.metadata.is_condition_true(ConditionType::Ready));
    assert_eq!(web.metadata.observed_generation, web.metadata.generation);
}

#[test]
fn commit_reports_derived_changes() {
    with_plane(|plane| {
        let outcome = plane.create(scenarios::web_and_db("shop"));
        let mappings: Vec<_> = outcome.changes_of(Kind::AddressGroupPortMapping).collect();
        assert_eq!(mappings.len(), 2);
        assert!(mappings.iter().all(|c| c.change_type == ChangeType::Created));
        assert!(outcome
            .changes
            .iter()
            .all(|c| c.record.resource_version() == outcome.version));
    });
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn mesh_compiles_to_one_rule_per_group_pair((locals, remotes) in mesh_size_strategy(4)) {
        let plane = TestPlane::new();
        plane.create(scenarios::mesh("ns", locals, remotes));

        let rules: Vec<IeAgAgRule> = plane.compiled_rules();
        prop_assert_eq!(rules.len(), locals * remotes);
        prop_assert!(rules.iter().all(|r| r.spec.ports
            == vec![PortSpec::Port(80), PortSpec::PortRange(PortRange::new(8000, 8080))]));
        let rule: RuleS2S = plane.stored("ns", "local-remote");
        prop_assert_eq!(rule.ie_ag_ag_rule_refs.len(), locals * remotes);
    }

    #[test]
    fn disjoint_ports_are_accepted(ports in disjoint_port_string_strategy()) {
        let plane = TestPlane::new();
        let outcome = plane.apply(
            vec![Service::new("ns", "svc").with_port(Protocol::Tcp, ports).into()],
            Operation::Create,
        );
        prop_assert!(outcome.is_ok());
    }
}
