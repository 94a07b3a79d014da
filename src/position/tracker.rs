//! Position P&L accounting

use crate::order::ExecutionInfo;
use rust_decimal::Decimal;
use serde::Serialize;

/// Cash-flow based P&L for one position
///
/// Buys consume cash and sells produce it, so once the position is flat the
/// cash balance less commissions is the realized P&L.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PnlTracker {
    cash: Decimal,
    shares: Decimal,
    commissions: Decimal,
    /// Notional put at risk by position-increasing trades
    invested: Decimal,
}

impl PnlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_execution(&mut self, is_buy: bool, info: &ExecutionInfo) {
        let signed = if is_buy { info.quantity } else { -info.quantity };

        let increases = self.shares.is_zero()
            || (self.shares > Decimal::ZERO) == (signed > Decimal::ZERO);
        if increases {
            self.invested += info.price * info.quantity;
        } else if signed.abs() > self.shares.abs() {
            // Flip through zero: only the excess opens new exposure
            self.invested += info.price * (signed.abs() - self.shares.abs());
        }

        self.cash -= signed * info.price;
        self.shares += signed;
        self.commissions += info.commission;
    }

    pub fn shares(&self) -> Decimal {
        self.shares
    }

    pub fn commissions(&self) -> Decimal {
        self.commissions
    }

    pub fn invested(&self) -> Decimal {
        self.invested
    }

    /// Net P&L with open shares marked at `mark`
    pub fn pnl(&self, mark: Option<Decimal>) -> Decimal {
        self.cash + self.shares * mark.unwrap_or_default() - self.commissions
    }

    /// P&L as a fraction of the invested notional
    pub fn return_on_investment(&self, mark: Option<Decimal>) -> Option<Decimal> {
        if self.invested.is_zero() {
            return None;
        }
        Some(self.pnl(mark) / self.invested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn exec(price: Decimal, quantity: Decimal, commission: Decimal) -> ExecutionInfo {
        ExecutionInfo {
            price,
            quantity,
            commission,
            date_time: Utc::now(),
        }
    }

    #[test]
    fn test_long_round_trip() {
        let mut tracker = PnlTracker::new();
        tracker.on_execution(true, &exec(dec!(100), dec!(10), dec!(1)));
        assert_eq!(tracker.pnl(Some(dec!(105))), dec!(49));

        tracker.on_execution(false, &exec(dec!(110), dec!(10), dec!(1)));
        assert!(tracker.shares().is_zero());
        assert_eq!(tracker.pnl(None), dec!(98));
        assert_eq!(tracker.invested(), dec!(1000));
        assert_eq!(tracker.return_on_investment(None), Some(dec!(0.098)));
    }

    #[test]
    fn test_short_round_trip() {
        let mut tracker = PnlTracker::new();
        tracker.on_execution(false, &exec(dec!(50), dec!(4), dec!(0)));
        tracker.on_execution(true, &exec(dec!(45), dec!(4), dec!(0)));
        assert_eq!(tracker.pnl(None), dec!(20));
        assert_eq!(tracker.invested(), dec!(200));
    }

    #[test]
    fn test_no_investment_no_return() {
        assert!(PnlTracker::new().return_on_investment(None).is_none());
    }
}
