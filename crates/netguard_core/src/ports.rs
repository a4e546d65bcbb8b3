//! Port strings and port-range arithmetic.
//!
//! A port string is a comma-separated list of tokens; each token is a single
//! port (`"443"`) or an inclusive range (`"8000-8080"`). Ports are 1..=65535.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive port range. A single port is the degenerate range `[p, p]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range.
    pub from: u16,
    /// Last port in the range (inclusive).
    pub to: u16,
}

impl PortRange {
    /// Creates a range. Callers must ensure `from <= to`.
    #[must_use]
    pub const fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    /// Creates a single-port range.
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }

    /// Returns true if the range covers exactly one port.
    #[must_use]
    pub const fn is_single(&self) -> bool {
        self.from == self.to
    }

    /// Two ranges overlap iff `from1 <= to2 && from2 <= to1`.
    #[must_use]
    pub const fn overlaps(&self, other: &PortRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Returns true if the ranges overlap or touch end to end.
    #[must_use]
    pub const fn adjoins(&self, other: &PortRange) -> bool {
        (self.from as u32) <= (other.to as u32) + 1 && (other.from as u32) <= (self.to as u32) + 1
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// A port string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port '{token}': {reason}")]
pub struct PortParseError {
    /// The offending token.
    pub token: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

fn parse_port(token: &str, whole: &str) -> Result<u16, PortParseError> {
    let err = |reason| PortParseError {
        token: whole.to_string(),
        reason,
    };
    let value: u32 = token.trim().parse().map_err(|_| err("not a number"))?;
    if value == 0 || value > u32::from(u16::MAX) {
        return Err(err("port must be between 1 and 65535"));
    }
    Ok(value as u16)
}

/// Parses a port string into its ranges, in declaration order.
///
/// # Errors
///
/// Returns an error for empty tokens, non-numeric values, ports outside
/// 1..=65535, and reversed ranges.
pub fn parse_ports(input: &str) -> Result<Vec<PortRange>, PortParseError> {
    if input.trim().is_empty() {
        return Err(PortParseError {
            token: input.to_string(),
            reason: "empty port string",
        });
    }

    input
        .split(',')
        .map(|raw| {
            let token = raw.trim();
            if token.is_empty() {
                return Err(PortParseError {
                    token: input.to_string(),
                    reason: "empty token",
                });
            }
            match token.split_once('-') {
                Some((from, to)) => {
                    let from = parse_port(from, token)?;
                    let to = parse_port(to, token)?;
                    if from > to {
                        return Err(PortParseError {
                            token: token.to_string(),
                            reason: "range start is greater than range end",
                        });
                    }
                    Ok(PortRange::new(from, to))
                }
                None => parse_port(token, token).map(PortRange::single),
            }
        })
        .collect()
}

/// Returns the first pair of overlapping ranges, if any.
#[must_use]
pub fn find_overlap(ranges: &[PortRange]) -> Option<(PortRange, PortRange)> {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();
    sorted
        .windows(2)
        .find(|w| w[0].overlaps(&w[1]))
        .map(|w| (w[0], w[1]))
}

/// Returns the first pair `(a, b)` with `a` from `left` and `b` from
/// `right` that overlap.
#[must_use]
pub fn find_overlap_between(
    left: &[PortRange],
    right: &[PortRange],
) -> Option<(PortRange, PortRange)> {
    left.iter()
        .find_map(|a| right.iter().find(|b| a.overlaps(b)).map(|b| (*a, *b)))
}

/// Merges overlapping and adjacent ranges into the smallest equivalent
/// sorted set.
#[must_use]
pub fn coalesce(ranges: impl IntoIterator<Item = PortRange>) -> Vec<PortRange> {
    let mut sorted: Vec<PortRange> = ranges.into_iter().collect();
    sorted.sort_unstable();

    let mut merged: Vec<PortRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if last.adjoins(&range) => last.to = last.to.max(range.to),
            _ => merged.push(range),
        }
    }
    merged
}

/// A port selector on a compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortSpec {
    /// A single port.
    Port(u16),
    /// An inclusive range of ports.
    PortRange(PortRange),
}

impl From<PortRange> for PortSpec {
    fn from(range: PortRange) -> Self {
        if range.is_single() {
            PortSpec::Port(range.from)
        } else {
            PortSpec::PortRange(range)
        }
    }
}

impl PortSpec {
    /// Returns the covered range.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        match self {
            PortSpec::Port(p) => PortRange::single(*p),
            PortSpec::PortRange(r) => *r,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.range().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_single_and_ranges() {
        assert_eq!(parse_ports("80").unwrap(), vec![PortRange::single(80)]);
        assert_eq!(
            parse_ports("80-90, 443").unwrap(),
            vec![PortRange::new(80, 90), PortRange::single(443)]
        );
        assert_eq!(parse_ports(" 22 ").unwrap(), vec![PortRange::single(22)]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_ports("").is_err());
        assert!(parse_ports("http").is_err());
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("65536").is_err());
        assert!(parse_ports("90-80").is_err());
        assert!(parse_ports("80,,81").is_err());
        assert!(parse_ports("80-").is_err());
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = PortRange::new(80, 90);
        assert!(a.overlaps(&PortRange::single(85)));
        assert!(a.overlaps(&PortRange::single(90)));
        assert!(!a.overlaps(&PortRange::single(91)));
        assert!(a.adjoins(&PortRange::single(91)));
    }

    #[test]
    fn find_overlap_detects_nested_ranges() {
        let ranges = parse_ports("80-90,85").unwrap();
        assert_eq!(
            find_overlap(&ranges),
            Some((PortRange::new(80, 90), PortRange::single(85)))
        );
        assert_eq!(find_overlap(&parse_ports("80,443,8080-8090").unwrap()), None);
    }

    #[test]
    fn find_overlap_between_sets() {
        let left = parse_ports("22,80").unwrap();
        let right = parse_ports("70-79,81-100").unwrap();
        assert_eq!(find_overlap_between(&left, &right), None);
        let right = parse_ports("75-85").unwrap();
        assert_eq!(
            find_overlap_between(&left, &right),
            Some((PortRange::single(80), PortRange::new(75, 85)))
        );
    }

    #[test]
    fn coalesce_merges_adjacent_and_overlapping() {
        let merged = coalesce(vec![
            PortRange::single(443),
            PortRange::new(80, 85),
            PortRange::new(86, 90),
            PortRange::new(88, 100),
            PortRange::single(22),
        ]);
        assert_eq!(
            merged,
            vec![
                PortRange::single(22),
                PortRange::new(80, 100),
                PortRange::single(443)
            ]
        );
    }

    #[test]
    fn coalesce_handles_max_port() {
        let merged = coalesce(vec![PortRange::single(65535), PortRange::new(65530, 65534)]);
        assert_eq!(merged, vec![PortRange::new(65530, 65535)]);
    }

    #[test]
    fn port_spec_from_range() {
        assert_eq!(PortSpec::from(PortRange::single(80)), PortSpec::Port(80));
        assert_eq!(
            PortSpec::from(PortRange::new(1, 2)),
            PortSpec::PortRange(PortRange::new(1, 2))
        );
        assert_eq!(PortSpec::Port(80).to_string(), "80");
    }

    fn range_strategy() -> impl Strategy<Value = PortRange> {
        (1u16..=65535, 0u16..64).prop_map(|(from, len)| PortRange::new(from, from.saturating_add(len)))
    }

    proptest! {
        #[test]
        fn coalesced_ranges_are_disjoint_and_cover_input(
            ranges in prop::collection::vec(range_strategy(), 0..24)
        ) {
            let merged = coalesce(ranges.clone());
            for pair in merged.windows(2) {
                prop_assert!(!pair[0].adjoins(&pair[1]));
                prop_assert!(pair[0].to < pair[1].from);
            }
            for r in &ranges {
                prop_assert!(merged.iter().any(|m| m.from <= r.from && r.to <= m.to));
            }
        }

        #[test]
        fn coalesce_is_idempotent(ranges in prop::collection::vec(range_strategy(), 0..24)) {
            let once = coalesce(ranges);
            prop_assert_eq!(coalesce(once.clone()), once);
        }
    }
}
