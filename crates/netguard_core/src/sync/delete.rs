//! Delete pipeline.
//!
//! Deletes cascade along [`OnDelete::Cascade`] edges, are blocked by
//! [`OnDelete::Block`] referrers, and recompile every RuleS2S that loses an
//! address group. Nothing here reaches the condition reconciler.

use netguard_store::{Reader, Record, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, trace};

use super::{apply_rank, ensure_user_writable, Staged};
use crate::compiler::RuleCompiler;
use crate::error::{NetguardError, NetguardResult};
use crate::model::{ObjectRef, Resource};
use crate::refs::{check_dependencies, ensure_unreferenced, referrers, OnDelete};
use crate::registry::KindRegistry;

pub(crate) struct DeletePipeline<'a> {
    registry: &'a KindRegistry,
    compiler: &'a RuleCompiler,
}

impl<'a> DeletePipeline<'a> {
    pub(crate) fn new(registry: &'a KindRegistry, compiler: &'a RuleCompiler) -> Self {
        Self { registry, compiler }
    }

    /// Stages the removal of `batch` and everything cascading from it.
    /// Leaves `txn` uncommitted.
    pub(crate) fn stage(
        &self,
        txn: &mut Transaction<Resource>,
        mut batch: Vec<Resource>,
    ) -> NetguardResult<Staged> {
        batch.sort_by_key(|obj| std::cmp::Reverse(apply_rank(obj.kind())));

        let mut removed: Vec<Resource> = Vec::new();
        let mut affected: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut staged = Staged::default();

        for obj in batch {
            let key = obj.key();
            ensure_user_writable(&obj)?;
            if removed.iter().any(|r| r.key() == key) {
                continue;
            }
            let current = txn.get(&key)?.ok_or_else(|| NetguardError::not_found(&key))?;
            let expected = obj.resource_version();
            if !expected.is_unset() && expected != current.resource_version() {
                return Err(NetguardError::conflict(
                    &key,
                    format!(
                        "expected resourceVersion {expected}, found {}",
                        current.resource_version()
                    ),
                ));
            }
            self.remove(txn, current, &mut removed, &mut affected)?;
            staged.touched.push(key);
        }

        for obj in &removed {
            let entry = self.registry.entry(obj)?;
            check_dependencies(&*txn, obj.kind(), &obj.object_ref())?;
            entry.validate_delete(&*txn, obj)?;
        }

        for rule in &affected {
            staged.compiled.push(self.compiler.recompile(txn, rule)?);
        }

        for obj in &removed {
            ensure_unreferenced(&*txn, obj.kind(), &obj.object_ref(), OnDelete::Recompile)?;
        }

        debug!(
            requested = staged.touched.len(),
            removed = removed.len(),
            rules = staged.compiled.len(),
            "staged delete batch"
        );
        Ok(staged)
    }

    fn remove(
        &self,
        txn: &mut Transaction<Resource>,
        obj: Resource,
        removed: &mut Vec<Resource>,
        affected: &mut BTreeSet<ObjectRef>,
    ) -> NetguardResult<()> {
        let key = obj.key();
        if txn.get(&key)?.is_none() {
            return Ok(());
        }
        let entry = self.registry.entry(&obj)?;
        affected.extend(entry.affected_rules(&*txn, &obj)?);
        txn.delete(&key)?;
        entry.after_delete(txn, &obj)?;

        let target = obj.object_ref();
        let kind = obj.kind();
        removed.push(obj);
        for (edge, dependent) in referrers(&*txn, kind, &target, OnDelete::Cascade)? {
            trace!(object = %dependent.key(), field = edge.field, target = %key, "cascade delete");
            self.remove(txn, dependent, removed, affected)?;
        }
        Ok(())
    }
}
