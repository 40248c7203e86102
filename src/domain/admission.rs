//! Bet Admission Policy - Limits, Anti-whale Share and Cooldown
//!
//! Pure validation of a prospective bet, run before any ledger mutation:
//! - Amount must be a whole number within `[min_amount, max_amount]`
//! - Same-day committed total must stay under the daily cap
//! - Post-bet share of the topic pool must stay under `max_pool_share`
//!   (only once the pool is non-empty)
//! - A consecutive-loss streak triggers a cooldown window
//!
//! Returns a structured rejection; never mutates state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::types::Points;
use crate::config::AdmissionConfig;

/// Facts about the user and topic gathered by the caller.
#[derive(Debug, Clone)]
pub struct AdmissionContext {
    /// Amount as submitted by the client.
    pub raw_amount: f64,
    /// Sum of the user's bet amounts placed since UTC midnight.
    pub committed_today: Points,
    /// Current total pool of the topic (both sides).
    pub topic_pool: Points,
    /// The user's current stake in this topic (both sides).
    pub user_topic_stake: Points,
    /// Consecutive losses, most recent first.
    pub loss_streak: u32,
    /// Settlement time of the most recent loss in the streak.
    pub last_loss_at: Option<DateTime<Utc>>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

/// Why a bet was refused.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdmissionRejection {
    #[error("amount must be a positive whole number of points")]
    InvalidAmount,
    #[error("amount {amount} is below the minimum of {min}")]
    BelowMinimum { amount: Points, min: Points },
    #[error("amount {amount} exceeds the maximum of {max}")]
    AboveMaximum { amount: Points, max: Points },
    #[error("daily cap of {cap} exceeded ({committed} already committed today)")]
    DailyCapExceeded { committed: Points, cap: Points },
    #[error("post-bet pool share {share:.3} exceeds the maximum of {max_share:.3}")]
    PoolShareExceeded { share: f64, max_share: f64 },
    #[error("betting paused after {streak} consecutive losses, {remaining_secs}s remaining")]
    CooldownActive { streak: u32, remaining_secs: i64 },
}

impl AdmissionRejection {
    /// Stable machine code for API envelopes and metrics labels.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::BelowMinimum { .. } => "BELOW_MIN_AMOUNT",
            Self::AboveMaximum { .. } => "ABOVE_MAX_AMOUNT",
            Self::DailyCapExceeded { .. } => "DAILY_CAP_EXCEEDED",
            Self::PoolShareExceeded { .. } => "POOL_SHARE_EXCEEDED",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
        }
    }
}

/// Parse a client-submitted amount into whole points.
pub fn parse_amount(raw: f64) -> Result<Points, AdmissionRejection> {
    #[allow(clippy::cast_precision_loss)]
    let in_range = raw.is_finite() && raw.fract() == 0.0 && raw > 0.0 && raw <= Points::MAX as f64;
    if !in_range {
        return Err(AdmissionRejection::InvalidAmount);
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(raw as Points)
}

/// Evaluate every admission rule; first failure wins.
pub fn evaluate(limits: &AdmissionConfig, ctx: &AdmissionContext) -> Result<Points, AdmissionRejection> {
    let amount = parse_amount(ctx.raw_amount)?;

    if amount < limits.min_amount {
        return Err(AdmissionRejection::BelowMinimum {
            amount,
            min: limits.min_amount,
        });
    }
    if amount > limits.max_amount {
        return Err(AdmissionRejection::AboveMaximum {
            amount,
            max: limits.max_amount,
        });
    }

    if let Some(cap) = limits.daily_cap {
        if ctx.committed_today.saturating_add(amount) > cap {
            return Err(AdmissionRejection::DailyCapExceeded {
                committed: ctx.committed_today,
                cap,
            });
        }
    }

    if let Some(max_share) = limits.max_pool_share {
        if ctx.topic_pool > 0 {
            #[allow(clippy::cast_precision_loss)]
            let share = ctx.user_topic_stake.saturating_add(amount) as f64
                / ctx.topic_pool.saturating_add(amount) as f64;
            if share > max_share {
                return Err(AdmissionRejection::PoolShareExceeded { share, max_share });
            }
        }
    }

    if limits.loss_streak_threshold > 0 && ctx.loss_streak >= limits.loss_streak_threshold {
        if let Some(last_loss) = ctx.last_loss_at {
            let elapsed = (ctx.now - last_loss).num_seconds();
            let cooldown = i64::try_from(limits.cooldown_seconds).unwrap_or(i64::MAX);
            if elapsed < cooldown {
                return Err(AdmissionRejection::CooldownActive {
                    streak: ctx.loss_streak,
                    remaining_secs: cooldown - elapsed,
                });
            }
        }
    }

    Ok(amount)
}
