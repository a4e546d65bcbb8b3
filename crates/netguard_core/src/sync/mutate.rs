//! Create, update and upsert pipeline.

use chrono::Utc;
use netguard_store::{Reader, Record, ResourceKey, ResourceVersion, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, trace};

use super::{apply_rank, ensure_user_writable, Staged, WriteMode};
use crate::compiler::RuleCompiler;
use crate::error::{NetguardError, NetguardResult};
use crate::model::{Kind, ObjectRef, Resource};
use crate::reconciler::{desired_conditions, merge_conditions};
use crate::registry::KindRegistry;

pub(crate) struct MutatePipeline<'a> {
    registry: &'a KindRegistry,
    compiler: &'a RuleCompiler,
}

impl<'a> MutatePipeline<'a> {
    pub(crate) fn new(registry: &'a KindRegistry, compiler: &'a RuleCompiler) -> Self {
        Self { registry, compiler }
    }

    /// Validates and stages `batch`, its derived objects and the rules it
    /// affects. Leaves `txn` uncommitted.
    pub(crate) fn stage(
        &self,
        txn: &mut Transaction<Resource>,
        mut batch: Vec<Resource>,
        mode: WriteMode,
    ) -> NetguardResult<Staged> {
        batch.sort_by_key(|obj| apply_rank(obj.kind()));

        let mut affected: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut staged = Staged::default();

        for obj in batch {
            let key = obj.key();
            ensure_user_writable(&obj)?;
            let entry = self.registry.entry(&obj)?;
            let existing = txn.get(&key)?;

            let obj = match (&existing, mode) {
                (Some(_), WriteMode::Create) => {
                    return Err(NetguardError::conflict(&key, "already exists"));
                }
                (None, WriteMode::Update) => return Err(NetguardError::not_found(&key)),
                (None, _) => Self::prepare_create(obj, mode)?,
                (Some(previous), _) => Self::prepare_update(obj, previous),
            };

            entry.validate(&*txn, existing.as_ref(), &obj)?;

            if let Some(previous) = &existing {
                affected.extend(entry.affected_rules(&*txn, previous)?);
            }
            affected.extend(entry.affected_rules(&*txn, &obj)?);

            match &existing {
                None => txn.create(obj.clone())?,
                Some(previous) if Self::is_unchanged(&obj, previous)? => {
                    trace!(object = %key, "unchanged, skipping write");
                    staged.touched.push(key);
                    continue;
                }
                Some(_) => txn.update(obj.clone())?,
            }
            trace!(object = %key, created = existing.is_none(), "staged write");
            entry.after_write(txn, existing.as_ref(), &obj)?;
            staged.touched.push(key);
        }

        for rule in &affected {
            let diff = self.compiler.recompile(txn, rule)?;
            for compiled in diff.written() {
                self.stamp_conditions(txn, &compiled.key(Kind::IeAgAgRule))?;
            }
            staged.compiled.push(diff);
        }
        debug!(
            objects = staged.touched.len(),
            rules = staged.compiled.len(),
            writes = txn.write_count(),
            "staged mutate batch"
        );
        Ok(staged)
    }

    /// Writes the conditions of a compiled rule in the transaction that
    /// writes the rule, so the enforcement feed sees one event per change.
    fn stamp_conditions(
        &self,
        txn: &mut Transaction<Resource>,
        key: &ResourceKey,
    ) -> NetguardResult<()> {
        let Some(current) = txn.get(key)? else {
            return Ok(());
        };
        let entry = self.registry.entry(&current)?;
        let desired = desired_conditions(entry, &*txn, &current, Utc::now())?;
        let mut next = current.clone();
        let generation = next.meta().generation;
        let meta = next.meta_mut();
        meta.conditions = merge_conditions(&current.meta().conditions, desired);
        meta.observed_generation = generation;
        if next != current {
            txn.update(next)?;
        }
        Ok(())
    }

    fn prepare_create(mut obj: Resource, mode: WriteMode) -> NetguardResult<Resource> {
        if mode == WriteMode::Upsert && !obj.resource_version().is_unset() {
            return Err(NetguardError::not_found(obj.key()));
        }
        obj.set_resource_version(ResourceVersion::UNSET);
        obj.clear_status();
        obj.meta_mut().stamp_created();
        Ok(obj)
    }

    /// Returns true if writing `obj` would store exactly `previous`.
    /// A stale expected version is still a conflict.
    fn is_unchanged(obj: &Resource, previous: &Resource) -> NetguardResult<bool> {
        let expected = obj.resource_version();
        let stored = previous.resource_version();
        if !expected.is_unset() && expected != stored {
            return Err(NetguardError::conflict(
                obj.key(),
                format!("expected resourceVersion {expected}, found {stored}"),
            ));
        }
        let mut candidate = obj.clone();
        candidate.set_resource_version(stored);
        Ok(&candidate == previous)
    }

    fn prepare_update(mut obj: Resource, previous: &Resource) -> Resource {
        obj.inherit_status(previous);
        if !obj.spec_eq(previous) {
            obj.meta_mut().generation += 1;
        }
        obj
    }
}
