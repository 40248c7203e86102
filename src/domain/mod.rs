//! Domain layer - Core ledger and settlement logic.
//!
//! Pure types and functions: no I/O, no async. The settlement calculator
//! and admission policy live here so they can be tested and benchmarked
//! in isolation.

pub mod admission;
pub mod errors;
pub mod fees;
pub mod payout;
pub mod types;

pub use admission::{AdmissionContext, AdmissionRejection};
pub use errors::{LedgerError, SettlementError};
pub use fees::FeeSchedule;
pub use payout::{
    BetPayout, SettlementCalculation, SettlementSummary, StakeInput, calculate_settlement,
    calculate_settlement_with_fee,
};
pub use types::{
    Bet, BetId, Choice, LedgerEntry, LedgerEntryType, LedgerRef, Points, PoolStats, Resolution,
    SettlementRecord, Topic, TopicId, TopicStatus, UserId, VoteId,
};
