//! RuleS2S and IEAgAgRule capabilities.

use netguard_store::{Reader, ResourceKey};
use std::collections::BTreeSet;

use super::{ensure_unchanged, require};
use crate::error::{NetguardError, NetguardResult};
use crate::model::{
    IeAgAgRule, ObjectRef, Resource, RuleS2S, Service, ServiceAlias, TypedReader, TypedResource,
};
use crate::registry::{Compilable, Readiness, Reconcilable, Validatable};

/// Resolves an alias to its service, failing with a reference error for
/// whichever link is missing.
fn resolve_alias(
    reader: &dyn Reader<Resource>,
    referrer: &ResourceKey,
    alias: &ObjectRef,
) -> NetguardResult<Service> {
    let alias = require::<ServiceAlias>(reader, referrer, alias)?;
    require::<Service>(reader, referrer, &alias.service())
}

impl Validatable for RuleS2S {
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let key = self.resource_key();
        resolve_alias(reader, &key, &self.local_alias())?;
        resolve_alias(reader, &key, &self.remote_alias())?;
        Ok(())
    }

    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        ensure_unchanged(
            &self.resource_key(),
            "spec.traffic",
            &old.spec.traffic,
            &self.spec.traffic,
        )?;
        self.validate_create(reader)
    }
}

impl Compilable for RuleS2S {
    fn affected_rules(&self, _reader: &dyn Reader<Resource>) -> NetguardResult<BTreeSet<ObjectRef>> {
        Ok(BTreeSet::from([self.reference()]))
    }
}

impl Reconcilable for RuleS2S {
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness> {
        for alias in [self.local_alias(), self.remote_alias()] {
            let Some(resolved) = reader.get_as::<ServiceAlias>(&alias)? else {
                return Ok(Readiness::not_ready(
                    "AliasNotFound",
                    format!("service alias {alias} does not exist"),
                ));
            };
            let service = resolved.service();
            if reader.get_as::<Service>(&service)?.is_none() {
                return Ok(Readiness::not_ready(
                    "ServiceNotFound",
                    format!("service alias {alias} points at missing service {service}"),
                ));
            }
        }
        Ok(Readiness::Ready)
    }
}

impl Validatable for IeAgAgRule {
    fn validate_create(&self, _reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        if self.spec.ports.is_empty() {
            return Err(NetguardError::validation(
                self.resource_key(),
                "compiled rule has no ports",
            ));
        }
        Ok(())
    }
}
