//! Core ledger and betting domain types.
//!
//! Defines the business entities: balances, ledger entries, bets, topics,
//! resolutions, settlement records and cached pool statistics.
//! These types are the foundation of the hexagonal architecture's inner ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────
// Identifier aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// User identifier supplied by the external auth layer.
pub type UserId = String;

/// Topic identifier owned by the topic lifecycle collaborator.
pub type TopicId = String;

/// Bet identifier (uuid v4 rendered as a string).
pub type BetId = String;

/// Vote identifier owned by the voting collaborator.
pub type VoteId = String;

/// Point amount. Balances are never negative; deltas are signed.
pub type Points = i64;

// ────────────────────────────────────────────
// Enums
// ────────────────────────────────────────────

/// Side of a binary topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Choice {
    Yes,
    No,
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// Topic lifecycle status, decided by the external state owner.
///
/// The engine itself only performs `Locked -> Resolved` at the
/// settlement commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicStatus {
    /// Accepting votes and bets.
    Open,
    /// Closed to participation, waiting for settlement.
    Locked,
    /// Settled; terminal.
    Resolved,
    /// Voided by the owner; bets are refunded.
    Canceled,
}

impl std::fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Locked => write!(f, "LOCKED"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Kind of ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// Stake debited when a bet is placed.
    BetPlace,
    /// Payout credited when a topic settles.
    BetSettle,
    /// Stake returned when a topic is canceled.
    BetRefund,
    /// Reward for a vote.
    VoteReward,
    /// Generic reward (signup bonus, events).
    Reward,
    /// Points spent on redemptions.
    Redeem,
    /// Manual operator adjustment.
    Adjust,
}

impl LedgerEntryType {
    /// Stable wire / metrics label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BetPlace => "BET_PLACE",
            Self::BetSettle => "BET_SETTLE",
            Self::BetRefund => "BET_REFUND",
            Self::VoteReward => "VOTE_REWARD",
            Self::Reward => "REWARD",
            Self::Redeem => "REDEEM",
            Self::Adjust => "ADJUST",
        }
    }
}

impl std::fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional reference tying a ledger entry to the event that caused it.
///
/// At most one of bet / vote can be set, which the enum makes unrepresentable
/// otherwise. `(reference, entry_type)` is unique across the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LedgerRef {
    Bet(BetId),
    Vote(VoteId),
}

// ────────────────────────────────────────────
// Entities
// ────────────────────────────────────────────

/// One immutable row of the append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// Owner of the balance that moved.
    pub user_id: UserId,
    /// Mutation kind.
    pub entry_type: LedgerEntryType,
    /// Signed, non-zero delta.
    pub amount: Points,
    /// Balance snapshot right after this entry was applied.
    pub balance_after: Points,
    /// Related bet or vote.
    pub reference: Option<LedgerRef>,
    /// Free-form operator note.
    pub note: Option<String>,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

/// A stake on one side of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub topic_id: TopicId,
    pub user_id: UserId,
    pub choice: Choice,
    /// Stake in points. Stored signed so tampered rows stay representable.
    pub amount: Points,
    /// Flipped exactly once, by settlement or cancellation refund.
    pub settled: bool,
    /// Set in the same unit of work that flips `settled`.
    pub payout_amount: Option<Points>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Create a new unsettled bet with a fresh id.
    pub fn new(topic_id: TopicId, user_id: UserId, choice: Choice, amount: Points) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic_id,
            user_id,
            choice,
            amount,
            settled: false,
            payout_amount: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Whether this settled bet paid nothing (counts toward a loss streak).
    pub fn is_loss(&self) -> bool {
        self.settled && self.payout_amount.unwrap_or(0) == 0
    }
}

/// Mirror of the collaborator-owned topic, used for gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub status: TopicStatus,
    pub updated_at: DateTime<Utc>,
}

/// Winning outcome supplied once per topic by an external resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub topic_id: TopicId,
    pub result: Choice,
    pub summary: String,
    pub resolver_id: UserId,
    pub resolved_at: DateTime<Utc>,
}

/// Immutable per-topic settlement summary. Its existence means "settled".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub topic_id: TopicId,
    pub result: Choice,
    pub total_pool: Points,
    /// Fee rate as a decimal string (e.g. "0.05").
    pub fee_rate: String,
    pub fee_collected: Points,
    pub net_pool: Points,
    pub payout_total: Points,
    pub winner_count: usize,
    pub settled_by_id: UserId,
    pub settled_at: DateTime<Utc>,
}

/// Cached aggregate of a topic's pools. Never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub yes_pool: Points,
    pub no_pool: Points,
    pub total_pool: Points,
    pub yes_price: f64,
    pub no_price: f64,
    pub cached_at: DateTime<Utc>,
}

impl PoolStats {
    /// Derive prices from pool totals; an empty topic prices at 0.5 / 0.5.
    pub fn from_pools(yes_pool: Points, no_pool: Points) -> Self {
        let total_pool = yes_pool.saturating_add(no_pool);
        #[allow(clippy::cast_precision_loss)]
        let (yes_price, no_price) = if total_pool > 0 {
            let yes = yes_pool as f64 / total_pool as f64;
            (yes, 1.0 - yes)
        } else {
            (0.5, 0.5)
        };
        Self {
            yes_pool,
            no_pool,
            total_pool,
            yes_price,
            no_price,
            cached_at: Utc::now(),
        }
    }
}
