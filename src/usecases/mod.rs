//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! ledger's workflows. Each use case is a self-contained operation.
//!
//! Use cases:
//! - `LedgerWriter`: single writer for balance-changing entries
//! - `BetService`: bet admission and stake debit
//! - `PoolCache`: two-tier pool price snapshots
//! - `SettlementOrchestrator`: pari-mutuel settlement and refunds
//! - `JobRunner` / `RecoverySweep`: retried settlement jobs
//! - `TopicService`: topic lifecycle and resolutions

pub mod bets;
pub mod ledger_writer;
pub mod pool_cache;
pub mod settlement;
pub mod settlement_jobs;
pub mod topics;
