//! Transactions over the resource store.
//!
//! A transaction provides:
//! - **Atomicity**: every write of every kind commits together or not at all
//! - **Snapshot isolation**: reads see the state as of `begin`, plus the
//!   transaction's own pending writes
//! - **Conflict detection**: commit fails if anything the transaction read
//!   or wrote was changed by a transaction that committed after its snapshot

mod state;

pub use state::{PendingWrite, ReadSet, Transaction, TransactionState};
