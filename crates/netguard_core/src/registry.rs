//! Per-kind capabilities and the registry that dispatches on them.
//!
//! Each kind implements the capability traits that apply to it. The
//! registry erases them into plain function pointers keyed by kind name,
//! so the pipelines never match on concrete kinds.

use netguard_store::{Reader, Record, Transaction};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{NetguardError, NetguardResult};
use crate::model::{Kind, ObjectRef, Resource, TypedResource};
use crate::validation::validate_identity;

/// Structural, referential and domain checks for one kind.
///
/// Name and namespace checks run before either method and need not be
/// repeated.
pub trait Validatable: TypedResource {
    /// Checks a new object against the transaction-visible state.
    fn validate_create(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()>;

    /// Checks a replacement for `old`. The default re-runs the creation
    /// checks; kinds with immutable fields compare them first.
    fn validate_update(&self, old: &Self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let _ = old;
        self.validate_create(reader)
    }

    /// Kind-specific delete checks, run against the state after the delete
    /// and its cascades.
    fn validate_delete(&self, reader: &dyn Reader<Resource>) -> NetguardResult<()> {
        let _ = reader;
        Ok(())
    }
}

/// Kinds whose writes can change compiled rules.
pub trait Compilable: TypedResource {
    /// RuleS2S objects whose compiled output may depend on this object.
    fn affected_rules(&self, reader: &dyn Reader<Resource>) -> NetguardResult<BTreeSet<ObjectRef>>;
}

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every hard dependency resolves.
    Ready,
    /// Some dependency is missing.
    NotReady {
        /// Machine-readable reason.
        reason: &'static str,
        /// Human-readable message.
        message: String,
    },
}

impl Readiness {
    /// Builds a not-ready outcome.
    pub fn not_ready(reason: &'static str, message: impl Into<String>) -> Self {
        Readiness::NotReady {
            reason,
            message: message.into(),
        }
    }
}

/// Kinds whose readiness depends on other objects.
pub trait Reconcilable: TypedResource {
    /// Checks the hard dependencies of this object.
    fn readiness(&self, reader: &dyn Reader<Resource>) -> NetguardResult<Readiness>;
}

/// Derived-state maintenance that must happen in the writing transaction.
pub trait WriteHooks: TypedResource {
    /// Runs after the object was staged for create or update.
    fn after_write(
        &self,
        previous: Option<&Self>,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<()> {
        let _ = (previous, txn);
        Ok(())
    }

    /// Runs after the object was staged for delete.
    fn after_delete(&self, txn: &mut Transaction<Resource>) -> NetguardResult<()> {
        let _ = txn;
        Ok(())
    }
}

type ValidateFn = fn(&dyn Reader<Resource>, Option<&Resource>, &Resource) -> NetguardResult<()>;
type ValidateDeleteFn = fn(&dyn Reader<Resource>, &Resource) -> NetguardResult<()>;
type AffectedFn = fn(&dyn Reader<Resource>, &Resource) -> NetguardResult<BTreeSet<ObjectRef>>;
type ReadinessFn = fn(&dyn Reader<Resource>, &Resource) -> NetguardResult<Readiness>;
type AfterWriteFn = fn(&mut Transaction<Resource>, Option<&Resource>, &Resource) -> NetguardResult<()>;
type AfterDeleteFn = fn(&mut Transaction<Resource>, &Resource) -> NetguardResult<()>;

fn downcast<T: TypedResource>(obj: &Resource) -> NetguardResult<&T> {
    T::from_ref(obj).ok_or_else(|| {
        NetguardError::validation(obj.key(), format!("expected kind {}", T::KIND))
    })
}

fn validate_erased<T: Validatable>(
    reader: &dyn Reader<Resource>,
    old: Option<&Resource>,
    new: &Resource,
) -> NetguardResult<()> {
    validate_identity(new)?;
    let typed = downcast::<T>(new)?;
    match old {
        Some(old) => typed.validate_update(downcast::<T>(old)?, reader),
        None => typed.validate_create(reader),
    }
}

fn validate_delete_erased<T: Validatable>(
    reader: &dyn Reader<Resource>,
    obj: &Resource,
) -> NetguardResult<()> {
    downcast::<T>(obj)?.validate_delete(reader)
}

fn affected_erased<T: Compilable>(
    reader: &dyn Reader<Resource>,
    obj: &Resource,
) -> NetguardResult<BTreeSet<ObjectRef>> {
    downcast::<T>(obj)?.affected_rules(reader)
}

fn readiness_erased<T: Reconcilable>(
    reader: &dyn Reader<Resource>,
    obj: &Resource,
) -> NetguardResult<Readiness> {
    downcast::<T>(obj)?.readiness(reader)
}

fn after_write_erased<T: WriteHooks>(
    txn: &mut Transaction<Resource>,
    previous: Option<&Resource>,
    obj: &Resource,
) -> NetguardResult<()> {
    let previous = previous.map(downcast::<T>).transpose()?;
    downcast::<T>(obj)?.after_write(previous, txn)
}

fn after_delete_erased<T: WriteHooks>(
    txn: &mut Transaction<Resource>,
    obj: &Resource,
) -> NetguardResult<()> {
    downcast::<T>(obj)?.after_delete(txn)
}

/// The capabilities registered for one kind.
pub struct KindEntry {
    kind: Kind,
    validate: ValidateFn,
    validate_delete: ValidateDeleteFn,
    affected: Option<AffectedFn>,
    readiness: Option<ReadinessFn>,
    after_write: Option<AfterWriteFn>,
    after_delete: Option<AfterDeleteFn>,
}

impl KindEntry {
    /// The kind.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Validates a create (`old` is `None`) or an update.
    pub fn validate(
        &self,
        reader: &dyn Reader<Resource>,
        old: Option<&Resource>,
        new: &Resource,
    ) -> NetguardResult<()> {
        (self.validate)(reader, old, new)
    }

    /// Runs kind-specific delete checks.
    pub fn validate_delete(&self, reader: &dyn Reader<Resource>, obj: &Resource) -> NetguardResult<()> {
        (self.validate_delete)(reader, obj)
    }

    /// Returns true if writes of this kind can change compiled rules.
    #[must_use]
    pub fn is_compilable(&self) -> bool {
        self.affected.is_some()
    }

    /// RuleS2S objects affected by `obj`; empty for non-compilable kinds.
    pub fn affected_rules(
        &self,
        reader: &dyn Reader<Resource>,
        obj: &Resource,
    ) -> NetguardResult<BTreeSet<ObjectRef>> {
        match self.affected {
            Some(f) => f(reader, obj),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Readiness of `obj`; kinds without dependencies are always ready.
    pub fn readiness(&self, reader: &dyn Reader<Resource>, obj: &Resource) -> NetguardResult<Readiness> {
        match self.readiness {
            Some(f) => f(reader, obj),
            None => Ok(Readiness::Ready),
        }
    }

    /// Runs the write hook, if any.
    pub fn after_write(
        &self,
        txn: &mut Transaction<Resource>,
        previous: Option<&Resource>,
        obj: &Resource,
    ) -> NetguardResult<()> {
        match self.after_write {
            Some(f) => f(txn, previous, obj),
            None => Ok(()),
        }
    }

    /// Runs the delete hook, if any.
    pub fn after_delete(&self, txn: &mut Transaction<Resource>, obj: &Resource) -> NetguardResult<()> {
        match self.after_delete {
            Some(f) => f(txn, obj),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for KindEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindEntry")
            .field("kind", &self.kind)
            .field("compilable", &self.affected.is_some())
            .field("reconcilable", &self.readiness.is_some())
            .field("hooks", &(self.after_write.is_some() || self.after_delete.is_some()))
            .finish()
    }
}

/// Adds optional capabilities to a freshly registered kind.
pub struct KindRegistration<'a, T> {
    entry: &'a mut KindEntry,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Compilable> KindRegistration<'_, T> {
    /// Registers [`Compilable`].
    pub fn compilable(self) -> Self {
        self.entry.affected = Some(affected_erased::<T>);
        self
    }
}

impl<T: Reconcilable> KindRegistration<'_, T> {
    /// Registers [`Reconcilable`].
    pub fn reconcilable(self) -> Self {
        self.entry.readiness = Some(readiness_erased::<T>);
        self
    }
}

impl<T: WriteHooks> KindRegistration<'_, T> {
    /// Registers [`WriteHooks`].
    pub fn with_hooks(self) -> Self {
        self.entry.after_write = Some(after_write_erased::<T>);
        self.entry.after_delete = Some(after_delete_erased::<T>);
        self
    }
}

/// Capabilities for every known kind, keyed by kind name.
#[derive(Debug, Default)]
pub struct KindRegistry {
    entries: BTreeMap<&'static str, KindEntry>,
}

impl KindRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`, replacing any previous entry for its kind.
    pub fn register<T: Validatable>(&mut self) -> KindRegistration<'_, T> {
        let entry = KindEntry {
            kind: T::KIND,
            validate: validate_erased::<T>,
            validate_delete: validate_delete_erased::<T>,
            affected: None,
            readiness: None,
            after_write: None,
            after_delete: None,
        };
        let entry = match self.entries.entry(T::KIND.as_str()) {
            btree_map::Entry::Occupied(mut slot) => {
                slot.insert(entry);
                slot.into_mut()
            }
            btree_map::Entry::Vacant(slot) => slot.insert(entry),
        };
        KindRegistration {
            entry,
            _kind: PhantomData,
        }
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&KindEntry> {
        self.entries.get(kind)
    }

    /// Looks up a kind, failing with a validation error for unknown kinds.
    pub fn entry(&self, obj: &Resource) -> NetguardResult<&KindEntry> {
        self.get(obj.kind().as_str())
            .ok_or_else(|| NetguardError::validation(obj.key(), "kind is not registered"))
    }

    /// Registered kinds, by name.
    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.entries.values().map(KindEntry::kind)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
