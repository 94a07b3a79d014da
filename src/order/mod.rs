//! Order model
//!
//! Orders, their fills and the events emitted as they move through their lifecycle.

mod aggregate;
mod event;
mod types;

pub use aggregate::Order;
pub use event::{OrderEvent, OrderEventType};
pub use types::{
    Action, BrokerOrderId, ExecutionInfo, OrderKey, OrderSpec, OrderState, OrderType,
};

use rust_decimal::Decimal;
use thiserror::Error;

/// Order model errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Invalid order state transition {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("Fill of {fill} exceeds remaining quantity ({filled} of {quantity} filled)")]
    Overfill {
        quantity: Decimal,
        filled: Decimal,
        fill: Decimal,
    },

    #[error("Order is no longer active ({0})")]
    NotActive(OrderState),
}
