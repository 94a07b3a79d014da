//! Order state-change notifications

use super::{ExecutionInfo, Order, OrderKey};
use serde::Serialize;
use std::fmt;

/// Kind of order transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderEventType::Accepted => "ACCEPTED",
            OrderEventType::PartiallyFilled => "PARTIALLY_FILLED",
            OrderEventType::Filled => "FILLED",
            OrderEventType::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// One order transition, delivered once
///
/// Carries a snapshot of the order taken right after the transition.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    key: OrderKey,
    order: Order,
    kind: OrderEventType,
    execution: Option<ExecutionInfo>,
    reason: Option<String>,
}

impl OrderEvent {
    pub fn accepted(key: OrderKey, order: Order) -> Self {
        Self {
            key,
            order,
            kind: OrderEventType::Accepted,
            execution: None,
            reason: None,
        }
    }

    /// Fill event; the type follows from the order's state after the fill
    pub fn fill(key: OrderKey, order: Order, execution: ExecutionInfo) -> Self {
        let kind = if order.is_filled() {
            OrderEventType::Filled
        } else {
            OrderEventType::PartiallyFilled
        };
        Self {
            key,
            order,
            kind,
            execution: Some(execution),
            reason: None,
        }
    }

    pub fn canceled(key: OrderKey, order: Order, reason: Option<String>) -> Self {
        Self {
            key,
            order,
            kind: OrderEventType::Canceled,
            execution: None,
            reason,
        }
    }

    pub fn key(&self) -> OrderKey {
        self.key
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn kind(&self) -> OrderEventType {
        self.kind
    }

    pub fn execution(&self) -> Option<&ExecutionInfo> {
        self.execution.as_ref()
    }

    /// Brokerage-reported reason, for cancellations
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_fill(&self) -> bool {
        matches!(
            self.kind,
            OrderEventType::PartiallyFilled | OrderEventType::Filled
        )
    }
}
