//! Pari-mutuel settlement calculator.
//!
//! Pure function, no I/O. Winners split the distributable pool in
//! proportion to their stake. Every entitlement is floored, and the
//! points lost to flooring are handed out one at a time to the winners
//! with the largest fractional remainder (ties: ascending bet id), so
//! the payouts always sum to exactly the distributable pool.
//!
//! All arithmetic is integer (`i128` intermediates); no floats touch
//! payout amounts.

use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::Serialize;

use super::fees::FeeSchedule;
use super::types::{BetId, Choice, Points, UserId};

/// One bet as seen by the calculator. `amount` is the raw stored value.
#[derive(Debug, Clone)]
pub struct StakeInput {
    pub id: BetId,
    pub user_id: UserId,
    pub choice: Choice,
    pub amount: Decimal,
}

impl StakeInput {
    pub fn new(id: impl Into<BetId>, user_id: impl Into<UserId>, choice: Choice, amount: Points) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            choice,
            amount: Decimal::from(amount),
        }
    }
}

/// Computed payout for one bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BetPayout {
    pub id: BetId,
    pub user_id: UserId,
    pub won: bool,
    pub payout: Points,
}

/// Aggregate figures of one calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub total_pool: Points,
    pub winner_pool: Points,
    pub fee_collected: Points,
    pub net_pool: Points,
    pub settled_count: usize,
    pub winner_count: usize,
    pub payout_total: Points,
    /// Bets whose raw amount was not a non-negative integer.
    /// Any non-zero value must be treated as fatal by the caller.
    pub invalid_amount_count: usize,
}

/// Full calculator output; `bets` keeps the input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementCalculation {
    pub bets: Vec<BetPayout>,
    pub summary: SettlementSummary,
}

impl SettlementCalculation {
    /// Payouts indexed by bet id.
    pub fn payouts_by_id(&self) -> HashMap<&str, Points> {
        self.bets.iter().map(|b| (b.id.as_str(), b.payout)).collect()
    }

    /// Recomputed sum of individual payouts.
    pub fn payout_sum(&self) -> Points {
        self.bets.iter().map(|b| b.payout).sum()
    }
}

/// Fee-free settlement: winners share the whole pool.
pub fn calculate_settlement(stakes: &[StakeInput], result: Choice) -> SettlementCalculation {
    calculate_settlement_with_fee(stakes, result, FeeSchedule::zero())
}

/// Settlement with the house fee taken off the total pool first.
///
/// With no winning stake the whole pool pays nothing and no fee is taken.
pub fn calculate_settlement_with_fee(
    stakes: &[StakeInput],
    result: Choice,
    fees: FeeSchedule,
) -> SettlementCalculation {
    let mut invalid_amount_count = 0usize;
    let amounts: Vec<i128> = stakes
        .iter()
        .map(|s| {
            let clean = sanitize_amount(s.amount);
            if Decimal::from(clean) != s.amount {
                invalid_amount_count += 1;
            }
            i128::from(clean)
        })
        .collect();

    let total_pool: i128 = amounts.iter().sum();
    let winner_pool: i128 = stakes
        .iter()
        .zip(&amounts)
        .filter(|(s, a)| s.choice == result && **a > 0)
        .map(|(_, a)| *a)
        .sum();

    let mut payouts = vec![0i128; stakes.len()];
    let mut won = vec![false; stakes.len()];
    let mut fee_collected = 0i128;

    if winner_pool > 0 {
        fee_collected = i128::from(fees.fee_on(to_points(total_pool)));
        let distributable = total_pool - fee_collected;

        // (index, fractional remainder numerator)
        let mut remainders: Vec<(usize, i128)> = Vec::new();
        let mut floored_sum = 0i128;
        for (i, (stake, amount)) in stakes.iter().zip(&amounts).enumerate() {
            if stake.choice != result || *amount == 0 {
                continue;
            }
            won[i] = true;
            let numerator = distributable * amount;
            payouts[i] = numerator / winner_pool;
            floored_sum += payouts[i];
            remainders.push((i, numerator % winner_pool));
        }

        let leftover = distributable - floored_sum;
        remainders.sort_by(|(ia, ra), (ib, rb)| match rb.cmp(ra) {
            Ordering::Equal => stakes[*ia].id.cmp(&stakes[*ib].id),
            other => other,
        });
        let leftover = usize::try_from(leftover).unwrap_or(0);
        for (i, _) in remainders.iter().take(leftover) {
            payouts[*i] += 1;
        }
    }

    let bets: Vec<BetPayout> = stakes
        .iter()
        .enumerate()
        .map(|(i, s)| BetPayout {
            id: s.id.clone(),
            user_id: s.user_id.clone(),
            won: won[i],
            payout: to_points(payouts[i]),
        })
        .collect();

    let payout_total: i128 = payouts.iter().sum();
    let summary = SettlementSummary {
        total_pool: to_points(total_pool),
        winner_pool: to_points(winner_pool),
        fee_collected: to_points(fee_collected),
        net_pool: to_points(total_pool - fee_collected),
        settled_count: stakes.len(),
        winner_count: won.iter().filter(|w| **w).count(),
        payout_total: to_points(payout_total),
        invalid_amount_count,
    };

    SettlementCalculation { bets, summary }
}

/// Floor to an integer and clamp negatives to zero.
fn sanitize_amount(raw: Decimal) -> Points {
    if raw <= Decimal::ZERO {
        return 0;
    }
    raw.floor().to_i64().unwrap_or(0)
}

fn to_points(v: i128) -> Points {
    Points::try_from(v).unwrap_or(Points::MAX)
}
