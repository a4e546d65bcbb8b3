//! AddressGroup, binding, policy and port-mapping capabilities.

use netguard_store::{Reader, Transaction};
use std::collections::BTreeSet;

use super::service::check_mapping_conflicts;
use super::{create_derived, ensure_unchanged, require, update_derived};
use crate::error::{NetguardError, NetguardResult};
use crate::lookup::{bindings_of_service, policies_for, rules_of_service};
use crate::model::{
    AddressGroup, AddressGroupBinding, AddressGroupBindingPolicy, AddressGroupPortMapping,
    ObjectRef, Resource, Service, ServicePorts, TypedReader, TypedResource,
};
use crate::ports::coalesce;
use crate::registry::{Compilable, Readiness, Reconcilable, Validatable, WriteHooks};
use crate::validation::{service_ports, ServicePortSet};

/// Sets (or with `None`, removes) `service`'s entry in `group`'s port
/// mapping. Creates the mapping if the group exists but has none.
pub(super) fn set_mapping_ports(
    txn: &mut Transaction<Resource>,
    group: &ObjectRef,
    service: &ObjectRef,
    ports: Option<&ServicePortSet>,
) -> NetguardResult<()> {
    let entry = ports.map(|p| ServicePorts {
        service_ref: service.clone(),
        tcp: coalesce(p.tcp.iter().copied()),
        udp: coalesce(p.udp.iter().copied()),
    });

    match txn.get_as::<AddressGroupPortMapping>(group)? {
        Some(previous) => {
            let mut mapping = previous.clone();
            match entry {
                Some(entry) => mapping.upsert(entry),
                None => {
                    mapping.remove(service);
                }
            }
            update_derived(txn, &previous.into_resource(), mapping.into_resource())
        }
        None => {
            let Some(entry) = entry else {
                return Ok(());
            };
            if txn.get_as::<AddressGroup>(group)?.is_none() {
                return Ok(());
            }
            let mut mapping = AddressGroupPortMapping::for_group(group);
            mapping.upsert(entry);
            create_derived(txn, mapping.into_resource())
        }
    }
}

impl Validatable for AddressGroup {
    fn validate_create(&self, _reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        Ok(())
    }
}

impl WriteHooks for AddressGroup {
    fn after_write(
        &self,
        previous: Option<&Self>,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<()> {
        if previous.is_some() {
            return Ok(());
        }
        let group = self.reference();
        if txn.get_as::<AddressGroupPortMapping>(&group)?.is_none() {
            create_derived(txn, AddressGroupPortMapping::for_group(&group).into_resource())?;
        }
        Ok(())
    }
}

impl Validatable for AddressGroupBinding {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        let service_ref = self.service();
        let group_ref = self.address_group();
        let service = require::<Service>(reader, &key, &service_ref)?;
        require::<AddressGroup>(reader, &key, &group_ref)?;

        if self.is_cross_namespace() && policies_for(reader, &service_ref, &group_ref)?.is_empty() {
            return Err(NetguardError::validation(
                &key,
                format!(
                    "binding service {service_ref} into address group {group_ref} across namespaces \
                     requires an AddressGroupBindingPolicy in namespace {:?}",
                    group_ref.namespace
                ),
            ));
        }

        if let Some(existing) = bindings_of_service(reader, &service_ref)?
            .into_iter()
            .find(|b| b.address_group() == group_ref && b.resource_key() != key)
        {
            return Err(NetguardError::validation(
                &key,
                format!(
                    "service {service_ref} is already bound to {group_ref} by {}",
                    existing.resource_key()
                ),
            ));
        }

        let ports = service_ports(&service)?;
        check_mapping_conflicts(&service, &ports, &group_ref, reader)
    }

    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        ensure_unchanged(&key, "spec.serviceRef", &old.service(), &self.service())?;
        ensure_unchanged(&key, "spec.addressGroupRef", &old.address_group(), &self.address_group())?;
        self.validate_create(reader)
    }
}

impl Compilable for AddressGroupBinding {
    fn affected_rules(&self, reader: &dyn Reader<Resource>) -> NetguardResult<BTreeSet<ObjectRef>> {
        rules_of_service(reader, &self.service())
    }
}

impl Reconcilable for AddressGroupBinding {
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness> {
        let service = self.service();
        let group = self.address_group();
        if reader.get_as::<Service>(&service)?.is_none() {
            return Ok(Readiness::not_ready(
                "ServiceNotFound",
                format!("service {service} does not exist"),
            ));
        }
        if reader.get_as::<AddressGroup>(&group)?.is_none() {
            return Ok(Readiness::not_ready(
                "AddressGroupNotFound",
                format!("address group {group} does not exist"),
            ));
        }
        if self.is_cross_namespace() && policies_for(reader, &service, &group)?.is_empty() {
            return Ok(Readiness::not_ready(
                "PolicyMissing",
                format!("no AddressGroupBindingPolicy approves {service} in {group}"),
            ));
        }
        Ok(Readiness::Ready)
    }
}

impl WriteHooks for AddressGroupBinding {
    fn after_write(
        &self,
        previous: Option<&Self>,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<()> {
        if previous.is_some() {
            return Ok(());
        }
        let service_ref = self.service();
        let group_ref = self.address_group();
        let service = require::<Service>(&*txn, &self.resource_key(), &service_ref)?;
        let ports = service_ports(&service)?;
        set_mapping_ports(txn, &group_ref, &service_ref, Some(&ports))?;

        if !service.address_groups.contains(&group_ref) {
            let mut updated = service.clone();
            updated.address_groups.push(group_ref);
            updated.address_groups.sort();
            update_derived(txn, &service.into_resource(), updated.into_resource())?;
        }
        Ok(())
    }

    fn after_delete(&self, txn: &mut Transaction<Resource>) -> NetguardResult<()> {
        let service_ref = self.service();
        let group_ref = self.address_group();
        set_mapping_ports(txn, &group_ref, &service_ref, None)?;

        if let Some(service) = txn.get_as::<Service>(&service_ref)? {
            let mut updated = service.clone();
            updated.address_groups.retain(|g| g != &group_ref);
            update_derived(txn, &service.into_resource(), updated.into_resource())?;
        }
        Ok(())
    }
}

impl Validatable for AddressGroupBindingPolicy {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        let service_ref = self.service();
        let group_ref = self.address_group();
        if self.metadata.namespace != group_ref.namespace {
            return Err(NetguardError::validation(
                &key,
                format!(
                    "policy must live in the address group's namespace {:?}",
                    group_ref.namespace
                ),
            ));
        }
        require::<Service>(reader, &key, &service_ref)?;
        require::<AddressGroup>(reader, &key, &group_ref)?;

        if let Some(existing) = policies_for(reader, &service_ref, &group_ref)?
            .into_iter()
            .find(|p| p.resource_key() != key)
        {
            return Err(NetguardError::validation(
                &key,
                format!(
                    "{service_ref} is already approved for {group_ref} by {}",
                    existing.resource_key()
                ),
            ));
        }
        Ok(())
    }

    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        ensure_unchanged(&key, "spec.serviceRef", &old.service(), &self.service())?;
        ensure_unchanged(&key, "spec.addressGroupRef", &old.address_group(), &self.address_group())?;
        self.validate_create(reader)
    }

    fn validate_delete(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let service_ref = self.service();
        let group_ref = self.address_group();
        if !policies_for(reader, &service_ref, &group_ref)?.is_empty() {
            return Ok(());
        }
        let relying: Vec<String> = bindings_of_service(reader, &service_ref)?
            .into_iter()
            .filter(|b| b.address_group() == group_ref && b.is_cross_namespace())
            .map(|b| b.resource_key().to_string())
            .collect();
        if relying.is_empty() {
            Ok(())
        } else {
            Err(NetguardError::dependency(self.resource_key(), relying))
        }
    }
}

impl Reconcilable for AddressGroupBindingPolicy {
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness> {
        let service = self.service();
        let group = self.address_group();
        if reader.get_as::<Service>(&service)?.is_none() {
            return Ok(Readiness::not_ready(
                "ServiceNotFound",
                format!("service {service} does not exist"),
            ));
        }
        if reader.get_as::<AddressGroup>(&group)?.is_none() {
            return Ok(Readiness::not_ready(
                "AddressGroupNotFound",
                format!("address group {group} does not exist"),
            ));
        }
        Ok(Readiness::Ready)
    }
}

impl Validatable for AddressGroupPortMapping {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        require::<AddressGroup>(reader, &self.resource_key(), &self.reference())?;
        Ok(())
    }
}

