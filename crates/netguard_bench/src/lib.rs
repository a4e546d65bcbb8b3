//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;

/// Generates a port string of `count` random tokens, a quarter of them
/// ranges. Tokens may overlap.
pub fn random_port_string(count: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let from: u16 = rng.gen_range(1..60_000);
            if rng.gen_ratio(1, 4) {
                format!("{from}-{}", from + rng.gen_range(1..500))
            } else {
                from.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Generates a port string of `count` disjoint single ports.
pub fn disjoint_port_string(count: usize) -> String {
    (0..count)
        .map(|i| (1000 + i * 3).to_string())
        .collect::<Vec<_>>()
        .join(",")
}
