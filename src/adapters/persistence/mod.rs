//! Persistence Adapters - In-Memory Store with File Durability
//!
//! Implements the `LedgerStore` port with a mutex-guarded in-memory store,
//! an append-only JSONL journal of every committed mutation, and atomic
//! JSON snapshots. Restart = last snapshot + newer journal records.
//! No database dependency; a relational adapter plugs in behind the same port.

pub mod journal;
pub mod memory_store;
pub mod snapshot;

pub use journal::{JournalRecord, LedgerJournal, StoreEvent};
pub use memory_store::{MemoryStore, StoreTables};
pub use snapshot::{SnapshotStore, StoreSnapshot};
