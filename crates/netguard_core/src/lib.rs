//! # Netguard Core
//!
//! Policy control plane for netguard.
//!
//! This crate provides:
//! - the resource model (services, address groups, aliases, bindings,
//!   policies, networks, service-to-service rules and compiled rules)
//! - per-kind validation and reference checks behind a [`KindRegistry`]
//! - the declarative reference graph used for delete checks and cascades
//! - the rule compiler turning `RuleS2S` objects into `IEAgAgRule` objects
//! - the condition reconciler writing `Validated`, `Synced` and `Ready`
//! - the change notifier publishing committed events to watchers
//! - the [`Orchestrator`] driving each batch through one transaction
//!
//! ## Example
//!
//! ```rust,ignore
//! use netguard_core::{EngineConfig, Operation, Orchestrator, Service, ServiceAlias};
//! use netguard_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let orchestrator = Orchestrator::new(Arc::new(MemoryStore::new()), EngineConfig::default());
//! orchestrator.sync(
//!     vec![
//!         Service::new("shop", "web").with_port(Protocol::Tcp, "80").into(),
//!         ServiceAlias::new("shop", "web", ObjectRef::new("", "web")).into(),
//!     ],
//!     Operation::Create,
//! )?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compiler;
mod config;
mod error;
mod kinds;
mod lookup;
mod model;
mod notifier;
mod ports;
mod reconciler;
mod refs;
mod registry;
mod sync;
mod validation;

pub use compiler::{compiled_rule_name, CompileDiff, RuleCompiler};
pub use config::{EngineConfig, RetryConfig};
pub use error::{NetguardError, NetguardResult};
pub use model::*;
pub use notifier::{ChangeNotifier, EventType, Subscription, WatchEvent, WatchFilter};
pub use ports::{coalesce, find_overlap, find_overlap_between, parse_ports, PortParseError, PortRange, PortSpec};
pub use reconciler::{
    desired_conditions, merge_conditions, ConditionReconciler, ReconcileOutcome, ReconcileReport,
};
pub use refs::{
    check_dependencies, edges_into, ensure_unreferenced, referrers, OnDelete, ReferenceEdge,
    REFERENCE_GRAPH,
};
pub use registry::{
    Compilable, KindEntry, KindRegistration, KindRegistry, Readiness, Reconcilable, Validatable,
    WriteHooks,
};
pub use sync::{Operation, Orchestrator, SyncOutcome};
pub use validation::{
    is_dns1123_label, parse_cidr, port_set_overlap, service_ports, validate_identity,
    ServicePortSet, MAX_NAME_LEN,
};

pub use netguard_store::{MemoryStore, ResourceKey, ResourceStore, ResourceVersion};
