//! Structural checks shared by every kind.

use ipnet::IpNet;
use netguard_store::{Record, ResourceKey};

use crate::error::{NetguardError, NetguardResult};
use crate::model::{Kind, Protocol, Resource, Service};
use crate::ports::{find_overlap, find_overlap_between, PortRange};

/// Maximum length of a DNS-1123 label.
pub const MAX_NAME_LEN: usize = 63;

/// Checks a DNS-1123 label: lowercase alphanumerics and `-`, at most 63
/// characters, starting and ending with an alphanumeric.
pub fn is_dns1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes.iter().all(|b| alnum(b) || *b == b'-')
        && bytes.first().is_some_and(alnum)
        && bytes.last().is_some_and(alnum)
}

/// Checks the object's name and namespace.
pub fn validate_identity(object: &Resource) -> NetguardResult<()> {
    let meta = object.meta();
    if !is_dns1123_label(&meta.name) {
        return Err(NetguardError::validation(
            object.key(),
            format!("invalid name {:?}: must be a DNS-1123 label", meta.name),
        ));
    }
    if !meta.namespace.is_empty() && !is_dns1123_label(&meta.namespace) {
        return Err(NetguardError::validation(
            object.key(),
            format!(
                "invalid namespace {:?}: must be a DNS-1123 label",
                meta.namespace
            ),
        ));
    }
    Ok(())
}

/// Parses a CIDR string.
pub fn parse_cidr(object: &ResourceKey, cidr: &str) -> NetguardResult<IpNet> {
    cidr.trim()
        .parse::<IpNet>()
        .map_err(|e| NetguardError::validation(object, format!("invalid CIDR {cidr:?}: {e}")))
}

/// Parsed ports of a service, one list per protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePortSet {
    /// TCP ranges in declaration order.
    pub tcp: Vec<PortRange>,
    /// UDP ranges in declaration order.
    pub udp: Vec<PortRange>,
}

impl ServicePortSet {
    /// Ranges for one protocol.
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> &[PortRange] {
        match protocol {
            Protocol::Tcp => &self.tcp,
            Protocol::Udp => &self.udp,
        }
    }

    /// Returns true if no ports are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.udp.is_empty()
    }
}

/// Parses every ingress port of a service and rejects overlaps within one
/// protocol.
pub fn service_ports(service: &Service) -> NetguardResult<ServicePortSet> {
    let key = ResourceKey::new(
        Kind::Service.as_str(),
        service.metadata.namespace.clone(),
        service.metadata.name.clone(),
    );
    let mut set = ServicePortSet::default();
    for protocol in Protocol::ALL {
        let ranges = service
            .port_ranges(protocol)
            .map_err(|e| NetguardError::validation(&key, e.to_string()))?;
        if let Some((a, b)) = find_overlap(&ranges) {
            return Err(NetguardError::validation(
                &key,
                format!("{protocol} ports {a} and {b} overlap"),
            ));
        }
        match protocol {
            Protocol::Tcp => set.tcp = ranges,
            Protocol::Udp => set.udp = ranges,
        }
    }
    Ok(set)
}

/// Returns the first pair of overlapping ranges between two port sets,
/// with the protocol they share.
pub fn port_set_overlap(
    a: &ServicePortSet,
    b: &ServicePortSet,
) -> Option<(Protocol, PortRange, PortRange)> {
    Protocol::ALL.into_iter().find_map(|protocol| {
        find_overlap_between(a.get(protocol), b.get(protocol)).map(|(x, y)| (protocol, x, y))
    })
}
