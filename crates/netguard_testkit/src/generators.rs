//! Property-based test generators using proptest.
//!
//! Provides strategies for port strings, object names and topology sizes
//! that satisfy validation.

use netguard_core::PortRange;
use proptest::prelude::*;

/// Strategy for generating valid ports.
pub fn port_strategy() -> impl Strategy<Value = u16> {
    1u16..=65535
}

/// Strategy for generating valid inclusive ranges.
pub fn port_range_strategy() -> impl Strategy<Value = PortRange> {
    (port_strategy(), 0u16..2048).prop_map(|(from, width)| {
        PortRange::new(from, from.saturating_add(width))
    })
}

/// Strategy for generating port strings with no overlapping tokens.
///
/// Tokens are emitted in random order so parsers cannot rely on sorting.
pub fn disjoint_port_string_strategy() -> impl Strategy<Value = String> {
    prop::collection::btree_set(1u16..=4000, 1..8)
        .prop_map(|starts| {
            // Ranges start at multiples of 16 and span at most 8 ports.
            starts
                .into_iter()
                .map(|s| {
                    let from = s * 16;
                    PortRange::new(from, from + (s % 8))
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
        .prop_map(|ranges| {
            ranges
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
}

/// Strategy for generating arbitrary (possibly overlapping) port strings.
pub fn port_string_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(port_range_strategy(), 1..6).prop_map(|ranges| {
        ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Strategy for generating valid object names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]([a-z0-9-]{0,14}[a-z0-9])?").expect("Invalid regex")
}

/// Strategy for generating `(locals, remotes)` address-group counts.
pub fn mesh_size_strategy(max: usize) -> impl Strategy<Value = (usize, usize)> {
    (1..=max, 1..=max)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
