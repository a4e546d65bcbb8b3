//! Protocol, direction and action enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// All protocols.
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    /// Lowercase name, used in compiled rule names.
    #[must_use]
    pub const fn short(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Traffic direction relative to the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Traffic {
    /// Into the local side.
    Ingress,
    /// Out of the local side.
    Egress,
}

impl Traffic {
    /// Lowercase short name, used in compiled rule names.
    #[must_use]
    pub const fn short(self) -> &'static str {
        match self {
            Traffic::Ingress => "ing",
            Traffic::Egress => "egr",
        }
    }
}

impl fmt::Display for Traffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Traffic::Ingress => write!(f, "INGRESS"),
            Traffic::Egress => write!(f, "EGRESS"),
        }
    }
}

/// Firewall action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    /// Let matching traffic through.
    #[default]
    Accept,
    /// Discard matching traffic.
    Drop,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Accept => write!(f, "ACCEPT"),
            RuleAction::Drop => write!(f, "DROP"),
        }
    }
}
