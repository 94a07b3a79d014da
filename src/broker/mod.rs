//! Broker capability and the live brokerage façade
//!
//! [`Broker`] is the surface positions and strategies trade through. The
//! live implementation talks to a [`BrokerageClient`](crate::venue::BrokerageClient)
//! and reconciles through [`TradeMonitor`]; the backtesting broker derives
//! fills from historical bars.

mod live;
mod monitor;
pub mod retry;

pub use live::LiveBroker;
pub use monitor::{
    MonitorBatch, MonitorCommand, MonitorHandle, MonitorReport, ReportKind, TradeMonitor,
};
pub use retry::{RetryPolicy, RetryRecord};

use crate::order::{Action, Order, OrderError, OrderEvent, OrderKey, OrderSpec, OrderState};
use crate::venue::VenueError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Broker errors
///
/// Everything except [`BrokerError::Submission`] is caller misuse and is
/// never retried.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Order must be in the INITIAL state, found {0}")]
    NotInitial(OrderState),

    #[error("Order {0} is not active")]
    NotActive(OrderKey),

    #[error("Order {0} is already filled")]
    AlreadyFilled(OrderKey),

    #[error("Unknown order {0}")]
    UnknownOrder(OrderKey),

    #[error("Brokerage rejected the request: {0}")]
    Submission(#[source] VenueError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Order entry, cancellation and event delivery
#[async_trait]
pub trait Broker: Send {
    /// Build an order in the INITIAL state without submitting it
    fn create_order(
        &self,
        action: Action,
        instrument: &str,
        spec: OrderSpec,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        Order::new(action, instrument, spec, quantity)
    }

    fn create_market_order(
        &self,
        action: Action,
        instrument: &str,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        self.create_order(action, instrument, OrderSpec::Market, quantity)
    }

    fn create_limit_order(
        &self,
        action: Action,
        instrument: &str,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        self.create_order(action, instrument, OrderSpec::Limit { limit }, quantity)
    }

    fn create_stop_order(
        &self,
        action: Action,
        instrument: &str,
        stop: Decimal,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        self.create_order(action, instrument, OrderSpec::Stop { stop }, quantity)
    }

    fn create_stop_limit_order(
        &self,
        action: Action,
        instrument: &str,
        stop: Decimal,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        self.create_order(
            action,
            instrument,
            OrderSpec::StopLimit { stop, limit },
            quantity,
        )
    }

    /// Submit an INITIAL order and take ownership of it
    ///
    /// On success the order is SUBMITTED; its ACCEPTED event arrives through
    /// [`Broker::dispatch`].
    async fn submit_order(&mut self, order: Order) -> Result<OrderKey, BrokerError>;

    /// Request cancellation; CANCELED arrives only once confirmed
    async fn cancel_order(&mut self, key: OrderKey) -> Result<(), BrokerError>;

    /// Change the price terms of an active order in place
    async fn modify_order(&mut self, key: OrderKey, spec: OrderSpec) -> Result<(), BrokerError>;

    fn order(&self, key: OrderKey) -> Option<&Order>;

    /// Keys of orders that are neither filled nor canceled
    fn active_orders(&self) -> Vec<OrderKey>;

    /// Deliver pending order events; called once per scheduler tick
    async fn dispatch(&mut self) -> Vec<OrderEvent>;
}
