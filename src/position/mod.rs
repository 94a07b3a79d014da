//! Positions: one entry order paired with at most one exit order
//!
//! A [`Position`] is driven by the order events its broker delivers. It owns
//! snapshots of its orders, never the orders themselves; the broker remains
//! the single owner of order state.

mod state;
mod tracker;

pub use state::{PositionSignal, PositionState};
pub use tracker::PnlTracker;

use crate::broker::{Broker, BrokerError};
use crate::order::{Action, ExecutionInfo, Order, OrderError, OrderEvent, OrderKey, OrderSpec};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Position identifier, unique within one strategy context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PositionId(u64);

impl PositionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Position errors
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("The entry order is still active")]
    EntryActive,

    #[error("Exit order {0} is already active")]
    ExitActive(OrderKey),

    #[error("There is no active exit order to modify")]
    NoActiveExit,

    #[error("The entry order is not active")]
    EntryNotActive,

    #[error("Position {0} is closed")]
    Closed(PositionId),

    #[error("Order {key} does not belong to position {position}")]
    UnexpectedEvent { position: PositionId, key: OrderKey },

    #[error("Broker lost track of order {0}")]
    MissingOrder(OrderKey),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

#[derive(Debug, Clone)]
struct Leg {
    key: OrderKey,
    order: Order,
}

impl Leg {
    fn snapshot<B: Broker + ?Sized>(broker: &B, key: OrderKey) -> Result<Self, PositionError> {
        let order = broker
            .order(key)
            .cloned()
            .ok_or(PositionError::MissingOrder(key))?;
        Ok(Self { key, order })
    }
}

/// Entry/exit order pair and the shares it holds
#[derive(Debug, Clone)]
pub struct Position {
    id: PositionId,
    instrument: String,
    state: PositionState,
    entry: Leg,
    exit: Option<Leg>,
    /// Signed net quantity, positive when long
    shares: Decimal,
    entry_at: Option<DateTime<Utc>>,
    exit_at: Option<DateTime<Utc>>,
    pnl: PnlTracker,
}

impl Position {
    /// Submit `entry` and start waiting for it to fill
    pub async fn open<B: Broker + ?Sized>(
        broker: &mut B,
        id: PositionId,
        entry: Order,
    ) -> Result<Self, PositionError> {
        let instrument = entry.instrument().to_string();
        let key = broker.submit_order(entry).await?;
        let entry = Leg::snapshot(broker, key)?;

        info!(
            position = %id,
            order_key = %key,
            instrument = %instrument,
            action = ?entry.order.action(),
            quantity = %entry.order.quantity(),
            "Position entry submitted"
        );

        Ok(Self {
            id,
            instrument,
            state: PositionState::WaitingEntry,
            entry,
            exit: None,
            shares: Decimal::ZERO,
            entry_at: None,
            exit_at: None,
            pnl: PnlTracker::new(),
        })
    }

    pub fn id(&self) -> PositionId {
        self.id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != PositionState::Closed
    }

    pub fn is_long(&self) -> bool {
        self.entry.order.is_buy()
    }

    pub fn shares(&self) -> Decimal {
        self.shares
    }

    pub fn entry_key(&self) -> OrderKey {
        self.entry.key
    }

    pub fn entry_order(&self) -> &Order {
        &self.entry.order
    }

    pub fn exit_key(&self) -> Option<OrderKey> {
        self.exit.as_ref().map(|leg| leg.key)
    }

    pub fn exit_order(&self) -> Option<&Order> {
        self.exit.as_ref().map(|leg| &leg.order)
    }

    pub fn entry_active(&self) -> bool {
        self.entry.order.is_active()
    }

    pub fn exit_active(&self) -> bool {
        self.exit.as_ref().is_some_and(|leg| leg.order.is_active())
    }

    pub fn entry_at(&self) -> Option<DateTime<Utc>> {
        self.entry_at
    }

    pub fn exit_at(&self) -> Option<DateTime<Utc>> {
        self.exit_at
    }

    /// Time since the entry filled, up to the exit fill when closed
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        match (self.entry_at, self.exit_at) {
            (Some(entry), Some(exit)) => exit - entry,
            (Some(entry), None) => now - entry,
            _ => Duration::zero(),
        }
    }

    pub fn pnl(&self) -> &PnlTracker {
        &self.pnl
    }

    /// Whether `key` is this position's entry or exit order
    pub fn owns(&self, key: OrderKey) -> bool {
        self.entry.key == key || self.exit_key() == Some(key)
    }

    /// Close the position with an order of the given price terms
    ///
    /// While waiting for the entry this only requests cancellation of the
    /// entry and returns `None`. Once open, any still-active entry is canceled
    /// and a single exit for `|shares|` is submitted. Closed positions ignore
    /// the call.
    pub async fn exit<B: Broker + ?Sized>(
        &mut self,
        broker: &mut B,
        spec: OrderSpec,
    ) -> Result<Option<OrderKey>, PositionError> {
        match self.state {
            PositionState::Closed => Ok(None),
            PositionState::WaitingEntry => {
                debug_assert!(self.shares.is_zero());
                if !self.entry_active() {
                    return Err(PositionError::EntryNotActive);
                }
                broker.cancel_order(self.entry.key).await?;
                info!(position = %self.id, order_key = %self.entry.key, "Entry cancel requested");
                Ok(None)
            }
            PositionState::Open => {
                if let Some(leg) = self.exit.as_ref().filter(|leg| leg.order.is_active()) {
                    return Err(PositionError::ExitActive(leg.key));
                }
                if self.entry_active() {
                    broker.cancel_order(self.entry.key).await?;
                }

                let action = if self.shares > Decimal::ZERO {
                    Action::Sell
                } else {
                    Action::BuyToCover
                };
                let order = broker.create_order(action, &self.instrument, spec, self.shares.abs())?;
                let key = broker.submit_order(order).await?;
                self.exit = Some(Leg::snapshot(broker, key)?);

                info!(
                    position = %self.id,
                    order_key = %key,
                    order_type = ?spec.order_type(),
                    quantity = %self.shares.abs(),
                    "Position exit submitted"
                );
                Ok(Some(key))
            }
        }
    }

    /// Change the price terms of the active exit order in place
    pub async fn modify_exit<B: Broker + ?Sized>(
        &mut self,
        broker: &mut B,
        spec: OrderSpec,
    ) -> Result<(), PositionError> {
        match self.state {
            PositionState::Closed => return Err(PositionError::Closed(self.id)),
            PositionState::WaitingEntry if self.entry_active() => {
                return Err(PositionError::EntryActive)
            }
            _ => {}
        }

        let key = match self.exit.as_ref() {
            Some(leg) if leg.order.is_active() => leg.key,
            _ => return Err(PositionError::NoActiveExit),
        };
        broker.modify_order(key, spec).await?;
        self.exit = Some(Leg::snapshot(broker, key)?);

        info!(position = %self.id, order_key = %key, ?spec, "Position exit modified");
        Ok(())
    }

    /// Apply an order event and report which callback it completes
    pub fn on_order_event(
        &mut self,
        event: &OrderEvent,
    ) -> Result<Option<PositionSignal>, PositionError> {
        if self.state == PositionState::Closed {
            return Err(PositionError::Closed(self.id));
        }

        let key = event.key();
        let is_entry = key == self.entry.key;
        let leg = if is_entry {
            &mut self.entry
        } else {
            match self.exit.as_mut().filter(|leg| leg.key == key) {
                Some(leg) => leg,
                None => {
                    return Err(PositionError::UnexpectedEvent {
                        position: self.id,
                        key,
                    })
                }
            }
        };
        leg.order = event.order().clone();

        if let Some(execution) = event.execution() {
            self.apply_execution(event.order().is_buy(), execution);
        }

        let old_state = self.state;
        let signal = match self.state {
            PositionState::WaitingEntry if is_entry => {
                if let Some(execution) = event.execution() {
                    self.state = PositionState::Open;
                    self.entry_at = Some(execution.date_time);
                    Some(PositionSignal::EnterOk)
                } else if event.order().is_canceled() {
                    self.state = PositionState::Closed;
                    Some(PositionSignal::EnterCanceled)
                } else {
                    None
                }
            }
            PositionState::Open if !is_entry => {
                if event.order().is_filled() && self.shares.is_zero() {
                    self.state = PositionState::Closed;
                    self.exit_at = event.execution().map(|e| e.date_time);
                    Some(PositionSignal::ExitOk)
                } else if event.order().is_canceled() {
                    Some(PositionSignal::ExitCanceled)
                } else {
                    None
                }
            }
            // Late entry fills or the entry remainder canceling while open
            _ => None,
        };

        if old_state != self.state {
            info!(
                position = %self.id,
                order_key = %key,
                old_state = %old_state,
                new_state = %self.state,
                shares = %self.shares,
                "Position transition"
            );
        } else if event.order().is_filled() && !self.shares.is_zero() && !is_entry {
            warn!(
                position = %self.id,
                order_key = %key,
                shares = %self.shares,
                "Exit filled with shares still held"
            );
        } else {
            debug!(position = %self.id, order_key = %key, kind = ?event.kind(), "Position event");
        }

        Ok(signal)
    }

    fn apply_execution(&mut self, is_buy: bool, execution: &ExecutionInfo) {
        if is_buy {
            self.shares += execution.quantity;
        } else {
            self.shares -= execution.quantity;
        }
        self.pnl.on_execution(is_buy, execution);
    }
}
