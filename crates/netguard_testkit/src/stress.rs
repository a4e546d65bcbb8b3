//! Stress helpers for the control plane.
//!
//! These helpers drive concurrent syncs against one orchestrator and check
//! that compiled state still matches what the committed objects imply.

use netguard_core::{
    IeAgAgRule, Operation, Protocol, Resource, RuleCompiler, RuleS2S, Service, TypedReader,
    TypedResource,
};
use std::thread;
use std::time::{Duration, Instant};

use crate::fixtures::TestPlane;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 50,
            threads: 4,
        }
    }
}

/// Concurrently rewrites the ports of `namespace/service` from several
/// threads, each update going through `sync_with_retry`.
///
/// Thread `t` writes port `10000 + t * operations + i` on its `i`th update,
/// so every write is distinct.
pub fn stress_concurrent_port_updates(
    plane: &TestPlane,
    namespace: &str,
    service: &str,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let results: Vec<(usize, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                scope.spawn(move || {
                    let mut ok = 0usize;
                    let mut failed = 0usize;
                    for i in 0..config.operations {
                        let port = 10_000 + t * config.operations + i;
                        let update: Resource = Service::new(namespace, service)
                            .with_port(Protocol::Tcp, port.to_string())
                            .into();
                        match plane.sync_with_retry(vec![update], Operation::Upsert) {
                            Ok(_) => ok += 1,
                            Err(_) => failed += 1,
                        }
                    }
                    (ok, failed)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.operations)))
            .collect()
    });

    let (ok, failed) = results
        .into_iter()
        .fold((0, 0), |(a, b), (ok, failed)| (a + ok, b + failed));
    StressTestResult::new(ok, failed, start.elapsed())
}

/// Returns true if every stored RuleS2S's compiled rules are exactly what
/// compiling it against the latest committed state yields.
pub fn rules_are_consistent(plane: &TestPlane) -> bool {
    let snapshot = plane.snapshot();
    let compiler = RuleCompiler::new(plane.config());
    let Ok(rules) = snapshot.list_as::<RuleS2S>(None) else {
        return false;
    };
    let Ok(stored) = snapshot.list_as::<IeAgAgRule>(None) else {
        return false;
    };

    for rule in &rules {
        let Ok(desired) = compiler.compile(&snapshot, rule) else {
            return false;
        };
        let mut actual: Vec<&IeAgAgRule> =
            stored.iter().filter(|r| r.owner == rule.reference()).collect();
        actual.sort_by_key(|r| r.reference());
        let refs: Vec<_> = desired.iter().map(|r| r.reference()).collect();
        if rule.ie_ag_ag_rule_refs != refs
            || actual.len() != desired.len()
            || actual
                .iter()
                .zip(&desired)
                .any(|(a, d)| a.reference() != d.reference() || a.spec != d.spec)
        {
            return false;
        }
    }
    let owned = stored
        .iter()
        .all(|r| rules.iter().any(|rule| rule.reference() == r.owner));
    owned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios;

    #[test]
    fn concurrent_updates_keep_rules_consistent() {
        let plane = TestPlane::new();
        plane.create(scenarios::mesh("ns", 2, 2));
        let config = StressConfig {
            operations: 10,
            threads: 3,
        };

        let result = stress_concurrent_port_updates(&plane, "ns", "local", &config);
        assert_eq!(result.total_ops, 30);
        assert!(rules_are_consistent(&plane));
    }
}
