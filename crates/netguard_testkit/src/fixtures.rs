//! Test fixtures and control-plane helpers.
//!
//! Provides an in-memory control plane with panicking helpers and builders
//! for common topologies.

use netguard_core::{
    EngineConfig, IeAgAgRule, NetguardResult, ObjectRef, Operation, Orchestrator, Resource,
    SyncOutcome, TypedResource,
};
use std::sync::Arc;

use crate::contention::ContendedStore;

/// An orchestrator over a fresh in-memory store.
pub struct TestPlane {
    /// The orchestrator under test.
    pub orchestrator: Orchestrator,
    store: Arc<ContendedStore>,
}

impl TestPlane {
    /// Creates a plane with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a plane with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(ContendedStore::new());
        let orchestrator = Orchestrator::new(store.clone(), config);
        Self {
            orchestrator,
            store,
        }
    }

    /// The backing store, for injecting commit races.
    pub fn contention(&self) -> &ContendedStore {
        &self.store
    }

    /// Applies a batch, returning the raw result.
    pub fn apply(&self, batch: Vec<Resource>, operation: Operation) -> NetguardResult<SyncOutcome> {
        self.orchestrator.sync(batch, operation)
    }

    /// Creates a batch, panicking on failure.
    pub fn create(&self, batch: Vec<Resource>) -> SyncOutcome {
        self.orchestrator
            .sync(batch, Operation::Create)
            .expect("create batch should succeed")
    }

    /// Upserts a batch, panicking on failure.
    pub fn upsert(&self, batch: Vec<Resource>) -> SyncOutcome {
        self.orchestrator
            .sync(batch, Operation::Upsert)
            .expect("upsert batch should succeed")
    }

    /// Deletes a batch, panicking on failure.
    pub fn delete(&self, batch: Vec<Resource>) -> SyncOutcome {
        self.orchestrator
            .sync(batch, Operation::Delete)
            .expect("delete batch should succeed")
    }

    /// Reads an object that may not exist.
    pub fn find<T: TypedResource>(&self, namespace: &str, name: &str) -> Option<T> {
        self.orchestrator
            .get::<T>(&ObjectRef::new(namespace, name))
            .expect("store read should succeed")
    }

    /// Reads an object that must exist.
    pub fn stored<T: TypedResource>(&self, namespace: &str, name: &str) -> T {
        self.find::<T>(namespace, name)
            .unwrap_or_else(|| panic!("{} {namespace}/{name} should exist", T::KIND))
    }

    /// Every compiled rule, ordered by identity.
    pub fn compiled_rules(&self) -> Vec<IeAgAgRule> {
        self.orchestrator
            .list::<IeAgAgRule>(None)
            .expect("store read should succeed")
    }
}

impl Default for TestPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestPlane {
    type Target = Orchestrator;

    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}

/// Runs a test against a fresh in-memory control plane.
///
/// # Example
///
/// ```rust,ignore
/// use netguard_testkit::with_plane;
///
/// #[test]
/// fn my_test() {
///     with_plane(|plane| {
///         plane.create(scenarios::web_and_db("shop"));
///     });
/// }
/// ```
pub fn with_plane<F, R>(f: F) -> R
where
    F: FnOnce(&TestPlane) -> R,
{
    let plane = TestPlane::new();
    f(&plane)
}

/// Topology builders.
///
/// Aliases are named after their service; bindings are named
/// `<service>-<group>`. References are namespace-relative.
pub mod scenarios {
    use netguard_core::{
        AddressGroup, AddressGroupBinding, AddressGroupBindingPolicy, Network, NetworkBinding,
        ObjectRef, Protocol, Resource, RuleAction, RuleS2S, Service, ServiceAlias, Traffic,
    };

    /// A service exposing `tcp_ports`.
    pub fn service(namespace: &str, name: &str, tcp_ports: &str) -> Service {
        Service::new(namespace, name).with_port(Protocol::Tcp, tcp_ports)
    }

    /// An alias for `service`, named after it.
    pub fn alias(namespace: &str, service: &str) -> ServiceAlias {
        ServiceAlias::new(namespace, service, ObjectRef::new("", service))
    }

    /// An address group accepting by default.
    pub fn group(namespace: &str, name: &str) -> AddressGroup {
        AddressGroup::new(namespace, name, RuleAction::Accept)
    }

    /// Binds `service` into `group`, both in `namespace`.
    pub fn binding(namespace: &str, service: &str, group: &str) -> AddressGroupBinding {
        AddressGroupBinding::new(
            namespace,
            format!("{service}-{group}"),
            ObjectRef::new("", service),
            ObjectRef::new("", group),
        )
    }

    /// Binds `service` (in `service_namespace`) into a group in another
    /// namespace. The binding lives with the service.
    pub fn cross_binding(
        service_namespace: &str,
        service: &str,
        group: &ObjectRef,
    ) -> AddressGroupBinding {
        AddressGroupBinding::new(
            service_namespace,
            format!("{service}-{}", group.name),
            ObjectRef::new("", service),
            group.clone(),
        )
    }

    /// Approves `service` for `group`. The policy lives with the group.
    pub fn policy(group: &ObjectRef, service: &ObjectRef) -> AddressGroupBindingPolicy {
        AddressGroupBindingPolicy::new(
            group.namespace.clone(),
            format!("{}-{}", service.namespace, service.name),
            service.clone(),
            ObjectRef::new("", group.name.clone()),
        )
    }

    /// A service, its alias and a binding into an existing group.
    pub fn bound_service(namespace: &str, name: &str, tcp_ports: &str, group: &str) -> Vec<Resource> {
        vec![
            service(namespace, name, tcp_ports).into(),
            alias(namespace, name).into(),
            binding(namespace, name, group).into(),
        ]
    }

    /// Services `web` (TCP 80) in `ag-web` and `db` (TCP 5432) in `ag-db`,
    /// with aliases.
    pub fn web_and_db(namespace: &str) -> Vec<Resource> {
        let mut objects: Vec<Resource> = vec![
            group(namespace, "ag-web").into(),
            group(namespace, "ag-db").into(),
        ];
        objects.extend(bound_service(namespace, "web", "80", "ag-web"));
        objects.extend(bound_service(namespace, "db", "5432", "ag-db"));
        objects
    }

    /// A rule between two aliases in `namespace`.
    pub fn rule(namespace: &str, name: &str, traffic: Traffic, local: &str, remote: &str) -> RuleS2S {
        RuleS2S::new(
            namespace,
            name,
            traffic,
            ObjectRef::new("", local),
            ObjectRef::new("", remote),
        )
    }

    /// Service `local` bound into `ag-l0..ag-l{locals}` and service
    /// `remote` bound into `ag-r0..ag-r{remotes}`, with aliases and an
    /// INGRESS rule `local-remote` between them.
    pub fn mesh(namespace: &str, locals: usize, remotes: usize) -> Vec<Resource> {
        let mut objects: Vec<Resource> = vec![
            service(namespace, "local", "80,8000-8080").into(),
            alias(namespace, "local").into(),
            service(namespace, "remote", "443").into(),
            alias(namespace, "remote").into(),
        ];
        for (prefix, svc, count) in [("ag-l", "local", locals), ("ag-r", "remote", remotes)] {
            for i in 0..count {
                let name = format!("{prefix}{i}");
                objects.push(group(namespace, &name).into());
                objects.push(binding(namespace, svc, &name).into());
            }
        }
        objects.push(rule(namespace, "local-remote", Traffic::Ingress, "local", "remote").into());
        objects
    }

    /// A network and a binding of it into `group`.
    pub fn bound_network(namespace: &str, name: &str, cidr: &str, group: &str) -> Vec<Resource> {
        vec![
            Network::new(namespace, name, cidr).into(),
            NetworkBinding::new(
                namespace,
                format!("{name}-{group}"),
                ObjectRef::new("", name),
                ObjectRef::new("", group),
            )
            .into(),
        ]
    }
}
