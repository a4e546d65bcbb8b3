//! Service and ServiceAlias.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, ObjectRef, Protocol};
use crate::ports::{parse_ports, PortParseError, PortRange};

/// A port (or port list) a service accepts traffic on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPort {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port string: `"80"`, `"8000-8080"` or a comma-separated list.
    pub port: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl IngressPort {
    /// Creates an ingress port.
    pub fn new(protocol: Protocol, port: impl Into<String>) -> Self {
        Self {
            protocol,
            port: port.into(),
            description: String::new(),
        }
    }

    /// Parses the port string.
    pub fn ranges(&self) -> Result<Vec<PortRange>, PortParseError> {
        parse_ports(&self.port)
    }
}

/// Desired state of a Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Ports the service is reachable on.
    #[serde(default)]
    pub ingress_ports: Vec<IngressPort>,
}

/// A service exposing a set of ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ServiceSpec,
    /// Address groups the service is bound to. Maintained by binding writes.
    #[serde(default)]
    pub address_groups: Vec<ObjectRef>,
}

impl Service {
    /// Creates a service with no ports.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ServiceSpec::default(),
            address_groups: Vec::new(),
        }
    }

    /// Adds an ingress port.
    #[must_use]
    pub fn with_port(mut self, protocol: Protocol, port: impl Into<String>) -> Self {
        self.spec.ingress_ports.push(IngressPort::new(protocol, port));
        self
    }

    /// Parsed port ranges for one protocol, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first port string that does not parse.
    pub fn port_ranges(&self, protocol: Protocol) -> Result<Vec<PortRange>, PortParseError> {
        let mut ranges = Vec::new();
        for port in self.spec.ingress_ports.iter().filter(|p| p.protocol == protocol) {
            ranges.extend(port.ranges()?);
        }
        Ok(ranges)
    }
}

/// Desired state of a ServiceAlias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAliasSpec {
    /// The service this alias points at.
    pub service_ref: ObjectRef,
}

/// An indirection to a Service, so rules can be re-pointed without edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAlias {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ServiceAliasSpec,
}

impl ServiceAlias {
    /// Creates an alias for `service_ref`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, service_ref: ObjectRef) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ServiceAliasSpec { service_ref },
        }
    }

    /// The aliased service, with the namespace defaulted.
    #[must_use]
    pub fn service(&self) -> ObjectRef {
        self.spec.service_ref.in_namespace(&self.metadata.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_ranges_by_protocol() {
        let svc = Service::new("ns", "web")
            .with_port(Protocol::Tcp, "80,443")
            .with_port(Protocol::Udp, "53")
            .with_port(Protocol::Tcp, "8000-8010");
        assert_eq!(
            svc.port_ranges(Protocol::Tcp).unwrap(),
            vec![
                PortRange::single(80),
                PortRange::single(443),
                PortRange::new(8000, 8010)
            ]
        );
        assert_eq!(svc.port_ranges(Protocol::Udp).unwrap(), vec![PortRange::single(53)]);
    }

    #[test]
    fn service_json_shape() {
        let svc = Service::new("ns", "web").with_port(Protocol::Tcp, "80");
        let json = serde_json::to_value(&svc).unwrap();
        assert_eq!(json["spec"]["ingressPorts"][0]["protocol"], "TCP");
        assert_eq!(json["metadata"]["name"], "web");
    }

    #[test]
    fn alias_defaults_namespace() {
        let alias = ServiceAlias::new("prod", "web-alias", ObjectRef::new("", "web"));
        assert_eq!(alias.service(), ObjectRef::new("prod", "web"));
    }
}
