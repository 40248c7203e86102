//! Typed error taxonomy for the ledger and settlement use cases.
//!
//! Callers match on variants rather than message text. Every variant has
//! a stable `code()` for API envelopes and metrics labels, and the
//! retry driver consults `is_retryable()`.

use thiserror::Error;

use super::types::{BetId, LedgerEntryType, LedgerRef, Points, TopicId, TopicStatus, UserId};

/// Failures of a single ledger delta.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger delta amount must be non-zero")]
    ZeroAmount,

    #[error("user id must not be empty")]
    MissingUser,

    #[error("insufficient balance for {user_id}: have {balance}, need {requested}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Points,
        requested: Points,
    },

    #[error("{entry_type} already recorded for {reference:?}")]
    DuplicateReference {
        reference: LedgerRef,
        entry_type: LedgerEntryType,
    },

    #[error("balance of {user_id} changed concurrently")]
    ConcurrentWriteRace { user_id: UserId },

    #[error("bet {bet_id} was already settled or its amount changed")]
    BetSettleRejected { bet_id: BetId },

    #[error("timed out waiting for the ledger lock of {user_id}")]
    LockTimeout { user_id: UserId },

    #[error("delta of {amount} on balance {balance} of {user_id} overflows")]
    AmountOverflow {
        user_id: UserId,
        balance: Points,
        amount: Points,
    },

    /// `status` is `None` when the topic is unknown to the store.
    #[error("topic {topic_id} is not accepting bets")]
    TopicClosed {
        topic_id: TopicId,
        status: Option<TopicStatus>,
    },

    #[error("ledger store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "ZERO_AMOUNT",
            Self::MissingUser => "MISSING_USER",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::DuplicateReference { .. } => "DUPLICATE_REFERENCE",
            Self::ConcurrentWriteRace { .. } => "CONCURRENT_WRITE_RACE",
            Self::BetSettleRejected { .. } => "BET_SETTLE_REJECTED",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::AmountOverflow { .. } => "AMOUNT_OVERFLOW",
            Self::TopicClosed { .. } => "TOPIC_NOT_OPEN",
            Self::Store(_) => "STORE_FAILURE",
        }
    }

    /// Lost races and lock contention can be retried as-is.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentWriteRace { .. } | Self::LockTimeout { .. }
        )
    }

    /// The effect already happened; idempotent callers may treat this as success.
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateReference { .. })
    }
}

/// Failures of one topic settlement or refund run.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("topic {0} not found")]
    TopicNotFound(TopicId),

    #[error("topic {0} has no resolution")]
    ResolutionMissing(TopicId),

    #[error("topic {0} is already settled")]
    AlreadySettled(TopicId),

    #[error("topic {topic_id} is {status}, expected {expected}")]
    TopicNotLockedForSettlement {
        topic_id: TopicId,
        status: TopicStatus,
        expected: TopicStatus,
    },

    #[error("topic {topic_id} has {count} bet(s) with invalid amounts")]
    InvalidBetAmountDetected { topic_id: TopicId, count: usize },

    #[error("topic {topic_id} has duplicate bet id {bet_id}")]
    DuplicateBetIdDetected { topic_id: TopicId, bet_id: BetId },

    #[error("payout integrity violation on {topic_id}: expected {expected}, got {actual}")]
    PayoutIntegrityViolation {
        topic_id: TopicId,
        expected: Points,
        actual: Points,
    },

    #[error("settled bet {bet_id} diverges from recomputed state: {detail}")]
    PartialSettlementMismatch { bet_id: BetId, detail: String },

    #[error("bet {bet_id} was settled by another worker")]
    BetAlreadySettledRace { bet_id: BetId },

    #[error("duplicate settlement transaction detected on {topic_id}: {detail}")]
    DuplicateSettlementTxDetected { topic_id: TopicId, detail: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("settlement store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SettlementError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TopicNotFound(_) => "TOPIC_NOT_FOUND",
            Self::ResolutionMissing(_) => "RESOLUTION_MISSING",
            Self::AlreadySettled(_) => "ALREADY_SETTLED",
            Self::TopicNotLockedForSettlement { .. } => "TOPIC_NOT_LOCKED_FOR_SETTLEMENT",
            Self::InvalidBetAmountDetected { .. } => "INVALID_BET_AMOUNT_DETECTED",
            Self::DuplicateBetIdDetected { .. } => "DUPLICATE_BET_ID_DETECTED",
            Self::PayoutIntegrityViolation { .. } => "PAYOUT_INTEGRITY_VIOLATION",
            Self::PartialSettlementMismatch { .. } => "PARTIAL_SETTLEMENT_MISMATCH",
            Self::BetAlreadySettledRace { .. } => "BET_ALREADY_SETTLED_RACE",
            Self::DuplicateSettlementTxDetected { .. } => "DUPLICATE_SETTLEMENT_TX_DETECTED",
            Self::Ledger(e) => e.code(),
            Self::Store(_) => "STORE_FAILURE",
        }
    }

    /// Only contention-type failures enter the backoff loop.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::BetAlreadySettledRace { .. } => true,
            Self::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Bug or tampering; never retried and always logged at error level.
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidBetAmountDetected { .. }
                | Self::DuplicateBetIdDetected { .. }
                | Self::PayoutIntegrityViolation { .. }
                | Self::PartialSettlementMismatch { .. }
                | Self::DuplicateSettlementTxDetected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_subset() {
        assert!(SettlementError::BetAlreadySettledRace { bet_id: "b".into() }.is_retryable());
        assert!(SettlementError::Ledger(LedgerError::ConcurrentWriteRace { user_id: "u".into() }).is_retryable());
        assert!(SettlementError::Ledger(LedgerError::LockTimeout { user_id: "u".into() }).is_retryable());
        assert!(!SettlementError::AlreadySettled("t".into()).is_retryable());
        assert!(!SettlementError::PayoutIntegrityViolation {
            topic_id: "t".into(),
            expected: 1,
            actual: 2,
        }
        .is_retryable());
    }

    #[test]
    fn test_integrity_classification() {
        let e = SettlementError::PartialSettlementMismatch {
            bet_id: "b".into(),
            detail: "x".into(),
        };
        assert!(e.is_integrity_violation());
        assert!(!SettlementError::ResolutionMissing("t".into()).is_integrity_violation());
    }

    #[test]
    fn test_ledger_codes_pass_through() {
        let e = SettlementError::from(LedgerError::InsufficientBalance {
            user_id: "u".into(),
            balance: 1,
            requested: 5,
        });
        assert_eq!(e.code(), "INSUFFICIENT_BALANCE");
    }
}
