//! Commission models

use crate::order::Order;
use rust_decimal::Decimal;

/// Commission charged for one fill
pub trait Commission: Send + Sync {
    fn calculate(&self, order: &Order, price: Decimal, quantity: Decimal) -> Decimal;
}

/// Free trading
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommission;

impl Commission for NoCommission {
    fn calculate(&self, _order: &Order, _price: Decimal, _quantity: Decimal) -> Decimal {
        Decimal::ZERO
    }
}

/// Flat fee per order, charged on its first fill only
#[derive(Debug, Clone, Copy)]
pub struct FixedPerTrade {
    pub amount: Decimal,
}

impl Commission for FixedPerTrade {
    fn calculate(&self, order: &Order, _price: Decimal, _quantity: Decimal) -> Decimal {
        if order.filled().is_zero() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Fraction of traded notional
#[derive(Debug, Clone, Copy)]
pub struct TradePercentage {
    pub fraction: Decimal,
}

impl Commission for TradePercentage {
    fn calculate(&self, _order: &Order, price: Decimal, quantity: Decimal) -> Decimal {
        price * quantity * self.fraction
    }
}
