//! Brokerage venue adapters
//!
//! [`BrokerageClient`] is the wire-level surface every venue implements: place,
//! modify and cancel orders, fetch the order book, and quote the last traded
//! price. Each adapter translates its own status vocabulary into [`VenueStatus`].

mod instruments;
mod kite;
mod mock;

pub use instruments::{InstrumentSpec, InstrumentTable};
pub use kite::{KiteClient, KiteConfig};
pub use mock::MockBrokerage;

use crate::order::{Action, BrokerOrderId, Order, OrderSpec, OrderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized brokerage order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueStatus {
    /// Received but not yet working (validation, modify/cancel in flight)
    Pending,
    /// Stop order waiting for its trigger
    TriggerPending,
    /// Working at the exchange
    Open,
    Canceled,
    Rejected,
    /// Fully executed
    Complete,
}

/// Venue-side errors
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),
}

/// Wire-neutral order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    /// Instrument symbol as known locally
    pub instrument: String,
    /// Two-sided BUY/SELL
    pub action: Action,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub good_till_canceled: bool,
    pub all_or_none: bool,
}

impl PlaceOrder {
    /// Request for the unfilled part of `order`
    pub fn from_order(order: &Order) -> Self {
        Self {
            instrument: order.instrument().to_string(),
            action: order.action().two_sided(),
            order_type: order.order_type(),
            quantity: order.remaining(),
            limit_price: order.limit_price(),
            stop_price: order.stop_price(),
            good_till_canceled: order.good_till_canceled(),
            all_or_none: order.all_or_none(),
        }
    }

    /// Same request with different price terms
    pub fn with_spec(mut self, spec: OrderSpec) -> Self {
        self.order_type = spec.order_type();
        self.limit_price = spec.limit_price();
        self.stop_price = spec.stop_price();
        self
    }
}

/// One row of the brokerage order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerageOrder {
    pub id: BrokerOrderId,
    pub status: VenueStatus,
    /// Raw status string as reported by the venue
    pub raw_status: String,
    /// Brokerage-reported reason (rejections, cancellations)
    pub status_message: Option<String>,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Wire-level brokerage API
#[async_trait]
pub trait BrokerageClient: Send + Sync + 'static {
    /// Place a new order and return the brokerage id
    async fn place_order(&self, request: &PlaceOrder) -> Result<BrokerOrderId, VenueError>;

    /// Modify a working order; the returned id may differ from `id`
    async fn modify_order(
        &self,
        id: &str,
        request: &PlaceOrder,
    ) -> Result<BrokerOrderId, VenueError>;

    /// Request cancellation of a working order
    async fn cancel_order(&self, id: &str) -> Result<(), VenueError>;

    /// Fetch the current order book
    async fn order_book(&self) -> Result<Vec<BrokerageOrder>, VenueError>;

    /// Last traded price for an instrument
    async fn last_traded_price(&self, instrument: &str) -> Result<Decimal, VenueError>;
}
