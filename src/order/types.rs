//! Order value types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Brokerage-assigned order identifier
pub type BrokerOrderId = String;

/// Stable local handle for an order
///
/// Brokerage ids can change mid-life (modify, resubmission), so positions and
/// the active-order registry refer to orders through this key instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey(u64);

impl OrderKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ord-{}", self.0)
    }
}

/// Order action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    BuyToCover,
    SellShort,
}

impl Action {
    /// True for actions that add to a long or reduce a short
    pub fn is_buy(self) -> bool {
        matches!(self, Action::Buy | Action::BuyToCover)
    }

    /// Collapse to the two-sided BUY/SELL vocabulary most venues expose
    pub fn two_sided(self) -> Action {
        if self.is_buy() {
            Action::Buy
        } else {
            Action::Sell
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Initial,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Initial, Submitted)
                | (Initial, Canceled)
                | (Submitted, Accepted)
                | (Submitted, Canceled)
                | (Accepted, PartiallyFilled)
                | (Accepted, Filled)
                | (Accepted, Canceled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Canceled)
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Initial => "INITIAL",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Accepted => "ACCEPTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// Price terms of an order
///
/// Used both when building orders and when modifying a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSpec {
    Market,
    Limit { limit: Decimal },
    Stop { stop: Decimal },
    StopLimit { stop: Decimal, limit: Decimal },
}

impl OrderSpec {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderSpec::Market => OrderType::Market,
            OrderSpec::Limit { .. } => OrderType::Limit,
            OrderSpec::Stop { .. } => OrderType::Stop,
            OrderSpec::StopLimit { .. } => OrderType::StopLimit,
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderSpec::Limit { limit } | OrderSpec::StopLimit { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            OrderSpec::Stop { stop } | OrderSpec::StopLimit { stop, .. } => Some(*stop),
            _ => None,
        }
    }
}

/// One fill against an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Fill price
    pub price: Decimal,
    /// Quantity filled by this execution
    pub quantity: Decimal,
    /// Commission charged for this execution
    pub commission: Decimal,
    /// Execution timestamp
    pub date_time: DateTime<Utc>,
}
