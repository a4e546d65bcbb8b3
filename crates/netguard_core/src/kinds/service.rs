//! Service and ServiceAlias capabilities.

use netguard_store::{Reader, Transaction};
use std::collections::BTreeSet;

use super::address_group::set_mapping_ports;
use super::require;
use crate::error::{NetguardError, NetguardResult};
use crate::lookup::{address_groups_of_service, rules_of_service, rules_using_alias};
use crate::model::{
    AddressGroupPortMapping, ObjectRef, Resource, Service, ServiceAlias, TypedReader,
    TypedResource,
};
use crate::registry::{Compilable, Readiness, Reconcilable, Validatable, WriteHooks};
use crate::validation::{port_set_overlap, service_ports, ServicePortSet};

/// Rejects ports that collide with another service exposed through one of
/// `service`'s address groups.
fn check_group_port_conflicts(
    service: &Service,
    ports: &ServicePortSet,
    reader: &dyn Reader<Resource>,
) -> NetguardResult<()> {
    let own = service.reference();
    for group in address_groups_of_service(reader, &own)? {
        check_mapping_conflicts(service, ports, &group, reader)?;
    }
    Ok(())
}

/// Rejects ports that collide with any other service in `group`'s port
/// mapping.
pub(super) fn check_mapping_conflicts(
    service: &Service,
    ports: &ServicePortSet,
    group: &ObjectRef,
    reader: &dyn Reader<Resource>,
) -> NetguardResult<()> {
    let own = service.reference();
    let Some(mapping) = reader.get_as::<AddressGroupPortMapping>(group)? else {
        return Ok(());
    };
    for entry in mapping.access_ports.iter().filter(|e| e.service_ref != own) {
        let other = ServicePortSet {
            tcp: entry.tcp.clone(),
            udp: entry.udp.clone(),
        };
        if let Some((protocol, mine, theirs)) = port_set_overlap(ports, &other) {
            return Err(NetguardError::validation(
                service.resource_key(),
                format!(
                    "{protocol} port {mine} overlaps port {theirs} of service {} in address group {group}",
                    entry.service_ref
                ),
            ));
        }
    }
    Ok(())
}

impl Validatable for Service {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let ports = service_ports(self)?;
        check_group_port_conflicts(self, &ports, reader)
    }
}

impl Compilable for Service {
    fn affected_rules(&self, reader: &dyn Reader<Resource>) -> NetguardResult<BTreeSet<ObjectRef>> {
        rules_of_service(reader, &self.reference())
    }
}

impl WriteHooks for Service {
    fn after_write(
        &self,
        previous: Option<&Self>,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<()> {
        let Some(previous) = previous else {
            return Ok(());
        };
        if previous.spec.ingress_ports == self.spec.ingress_ports {
            return Ok(());
        }
        let ports = service_ports(self)?;
        let own = self.reference();
        for group in address_groups_of_service(&*txn, &own)? {
            set_mapping_ports(txn, &group, &own, Some(&ports))?;
        }
        Ok(())
    }
}

impl Validatable for ServiceAlias {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        require::<Service>(reader, &self.resource_key(), &self.service())?;
        Ok(())
    }
}

impl Compilable for ServiceAlias {
    fn affected_rules(&self, reader: &dyn Reader<Resource>) -> NetguardResult<BTreeSet<ObjectRef>> {
        rules_using_alias(reader, &self.reference())
    }
}

impl Reconcilable for ServiceAlias {
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness> {
        let service = self.service();
        if reader.get_as::<Service>(&service)?.is_some() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::not_ready(
                "ServiceNotFound",
                format!("service {service} does not exist"),
            ))
        }
    }
}
