//! # Netguard Testkit
//!
//! Test utilities for netguard.
//!
//! This crate provides:
//! - an in-memory control plane with panicking convenience helpers
//! - builders for the usual service, alias and binding topologies
//! - property-based generators for port specs and topologies
//! - concurrent sync stress helpers
//! - a store wrapper that makes chosen commits lose a race
//!
//! ## Usage
//!
//! ```rust,ignore
//! use netguard_testkit::prelude::*;
//!
//! #[test]
//! fn web_reaches_db() {
//!     with_plane(|plane| {
//!         plane.create(scenarios::web_and_db("shop"));
//!         plane.create(vec![scenarios::rule("shop", "web-db", Traffic::Ingress, "web", "db").into()]);
//!         assert_eq!(plane.compiled_rules().len(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod contention;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::contention::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::init_tracing;
}

pub use contention::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;

/// Installs a tracing subscriber honoring `RUST_LOG`, writing through the
/// test harness's captured output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
