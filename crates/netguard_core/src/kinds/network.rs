//! Network and NetworkBinding capabilities.

use netguard_store::{Reader, Transaction};

use super::{ensure_unchanged, require, update_derived};
use crate::error::{NetguardError, NetguardResult};
use crate::model::{
    AddressGroup, Network, NetworkBinding, NetworkItem, Resource, TypedReader, TypedResource,
};
use crate::registry::{Readiness, Reconcilable, Validatable, WriteHooks};
use crate::validation::parse_cidr;

impl Validatable for Network {
    fn validate_create(&self, _reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        parse_cidr(&self.resource_key(), &self.spec.cidr)?;
        Ok(())
    }

    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        ensure_unchanged(
            &self.resource_key(),
            "spec.cidr",
            &old.spec.cidr.trim(),
            &self.spec.cidr.trim(),
        )?;
        self.validate_create(reader)
    }
}

impl Validatable for NetworkBinding {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        let network = require::<Network>(reader, &key, &self.network())?;
        require::<AddressGroup>(reader, &key, &self.address_group())?;

        let own = self.reference();
        match &network.binding_ref {
            Some(bound_by) if network.is_bound && bound_by != &own => {
                Err(NetguardError::validation(
                    &key,
                    format!("network {} is already bound by {bound_by}", self.network()),
                ))
            }
            _ => Ok(()),
        }
    }

    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        ensure_unchanged(&key, "spec.networkRef", &old.network(), &self.network())?;
        ensure_unchanged(&key, "spec.addressGroupRef", &old.address_group(), &self.address_group())?;
        self.validate_create(reader)
    }
}

impl Reconcilable for NetworkBinding {
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness> {
        let network_ref = self.network();
        let group = self.address_group();
        let Some(network) = reader.get_as::<Network>(&network_ref)? else {
            return Ok(Readiness::not_ready(
                "NetworkNotFound",
                format!("network {network_ref} does not exist"),
            ));
        };
        if network.binding_ref.as_ref() != Some(&self.reference()) {
            return Ok(Readiness::not_ready(
                "NetworkNotBound",
                format!("network {network_ref} is not bound by this binding"),
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

impl WriteHooks for NetworkBinding {
    fn after_write(
        &self,
        previous: Option<&Self>,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<()> {
        if previous.is_some() {
            return Ok(());
        }
        let key = self.resource_key();
        let network_ref = self.network();
        let group_ref = self.address_group();

        let network = require::<Network>(&*txn, &key, &network_ref)?;
        let mut bound = network.clone();
        bound.is_bound = true;
        bound.binding_ref = Some(self.reference());
        bound.address_group_ref = Some(group_ref.clone());
        update_derived(txn, &network.clone().into_resource(), bound.into_resource())?;

        let group = require::<AddressGroup>(&*txn, &key, &group_ref)?;
        if !group.networks.iter().any(|n| n.network_ref == network_ref) {
            let mut updated = group.clone();
            updated.networks.push(NetworkItem {
                name: network.metadata.name.clone(),
                cidr: network.spec.cidr.clone(),
                network_ref,
            });
            update_derived(txn, &group.into_resource(), updated.into_resource())?;
        }
        Ok(())
    }

    fn after_delete(&self, txn: &mut Transaction<Resource>) -> NetguardResult<()> {
        let network_ref = self.network();
        let own = self.reference();

        if let Some(network) = txn.get_as::<Network>(&network_ref)? {
            if network.binding_ref.as_ref() == Some(&own) {
                let mut unbound = network.clone();
                unbound.is_bound = false;
                unbound.binding_ref = None;
                unbound.address_group_ref = None;
                update_derived(txn, &network.into_resource(), unbound.into_resource())?;
            }
        }

        if let Some(group) = txn.get_as::<AddressGroup>(&self.address_group())? {
            let mut updated = group.clone();
            updated.networks.retain(|n| n.network_ref != network_ref);
            update_derived(txn, &group.into_resource(), updated.into_resource())?;
        }
        Ok(())
    }
}
