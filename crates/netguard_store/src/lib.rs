//! # Netguard Store
//!
//! Transactional resource store for netguard.
//!
//! This crate provides the lowest layer of the control plane: a store of
//! records keyed by `(kind, namespace, name)` with
//! - isolated read snapshots
//! - atomic multi-kind writer transactions
//! - optimistic concurrency on per-record versions
//! - commit-time conflict detection (snapshot isolation, first committer wins)
//!
//! The store does not know what a Service or a rule is. Higher layers
//! implement [`Record`] for their resource type and drive transactions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use netguard_store::{MemoryStore, Reader, ResourceStore};
//!
//! let store = MemoryStore::new();
//! let mut txn = store.begin()?;
//! txn.create(record)?;
//! // Reads through the transaction see its own pending writes.
//! assert!(txn.exists(&record_key)?);
//! store.commit(&mut txn)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod reader;
mod record;
mod transaction;
mod types;

pub use backend::{Change, ChangeType, CommitOutcome, ResourceStore};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use reader::{Reader, Snapshot};
pub use record::Record;
pub use transaction::{PendingWrite, ReadSet, Transaction, TransactionState};
pub use types::{ResourceKey, ResourceVersion, TransactionId};
