//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use-case layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `LedgerStore`: Transactional balances, ledger, bets and settlements
//! - `LockManager`: Keyed exclusive sections (per user, per topic)
//! - `JobQueue`: Keyed settlement job dispatch
//! - `SharedCache`: Optional remote cache tier

pub mod cache;
pub mod job_queue;
pub mod lock;
pub mod store;
