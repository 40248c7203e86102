//! Settlement fee extraction.
//!
//! The house fee is taken off the total pool before the pari-mutuel split.
//! A zero rate (the default) leaves the pool untouched so that winners
//! share exactly `total_pool`.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;

use super::types::Points;

/// Fee schedule applied at settlement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Fraction of the total pool kept by the house, in `[0, 1)`.
    rate: Decimal,
}

impl FeeSchedule {
    /// Creates a schedule; rates outside `[0, 1)` are clamped.
    pub fn new(rate: Decimal) -> Self {
        let max = Decimal::ONE - Decimal::new(1, 6);
        Self {
            rate: rate.max(Decimal::ZERO).min(max),
        }
    }

    /// Fee-free schedule.
    pub const fn zero() -> Self {
        Self {
            rate: Decimal::ZERO,
        }
    }

    /// Build from a float config value.
    pub fn from_f64(rate: f64) -> Self {
        Self::new(Decimal::from_f64(rate).unwrap_or(Decimal::ZERO))
    }

    /// Configured rate.
    pub const fn rate(&self) -> Decimal {
        self.rate
    }

    /// Fee on a pool: `floor(total_pool * rate)`, never negative.
    pub fn fee_on(&self, total_pool: Points) -> Points {
        if total_pool <= 0 || self.rate.is_zero() {
            return 0;
        }
        (Decimal::from(total_pool) * self.rate)
            .floor()
            .to_i64()
            .unwrap_or(0)
            .clamp(0, total_pool)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_fee() {
        assert_eq!(FeeSchedule::zero().fee_on(1_000), 0);
    }

    #[test]
    fn test_fee_floors() {
        let fees = FeeSchedule::new(dec!(0.05));
        assert_eq!(fees.fee_on(1_000), 50);
        assert_eq!(fees.fee_on(199), 9);
    }

    #[test]
    fn test_rate_clamped() {
        assert_eq!(FeeSchedule::new(dec!(-0.2)).rate(), Decimal::ZERO);
        assert!(FeeSchedule::new(dec!(3)).rate() < Decimal::ONE);
    }

    #[test]
    fn test_from_f64() {
        let fees = FeeSchedule::from_f64(0.1);
        assert_eq!(fees.fee_on(100), 10);
    }
}
