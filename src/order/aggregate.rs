//! The mutable order aggregate

use super::{Action, BrokerOrderId, ExecutionInfo, OrderError, OrderSpec, OrderState, OrderType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order and its accumulated fills
///
/// State only moves forward (see [`OrderState::can_transition_to`]) and the
/// filled quantity never exceeds the requested quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: Option<BrokerOrderId>,
    instrument: String,
    action: Action,
    order_type: OrderType,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    state: OrderState,
    filled: Decimal,
    avg_fill_price: Option<Decimal>,
    commissions: Decimal,
    submitted_at: Option<DateTime<Utc>>,
    good_till_canceled: bool,
    all_or_none: bool,
    stop_hit: bool,
    last_execution: Option<ExecutionInfo>,
}

impl Order {
    /// Build an order in the INITIAL state
    pub fn new(
        action: Action,
        instrument: impl Into<String>,
        spec: OrderSpec,
        quantity: Decimal,
    ) -> Result<Self, OrderError> {
        if quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(quantity));
        }
        for price in [spec.limit_price(), spec.stop_price()].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidPrice(price));
            }
        }

        Ok(Self {
            id: None,
            instrument: instrument.into(),
            action,
            order_type: spec.order_type(),
            quantity,
            limit_price: spec.limit_price(),
            stop_price: spec.stop_price(),
            state: OrderState::Initial,
            filled: Decimal::ZERO,
            avg_fill_price: None,
            commissions: Decimal::ZERO,
            submitted_at: None,
            good_till_canceled: false,
            all_or_none: false,
            stop_hit: false,
            last_execution: None,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    /// Current price terms
    pub fn spec(&self) -> OrderSpec {
        match self.order_type {
            OrderType::Market => OrderSpec::Market,
            OrderType::Limit => OrderSpec::Limit {
                limit: self.limit_price.unwrap_or_default(),
            },
            OrderType::Stop => OrderSpec::Stop {
                stop: self.stop_price.unwrap_or_default(),
            },
            OrderType::StopLimit => OrderSpec::StopLimit {
                stop: self.stop_price.unwrap_or_default(),
                limit: self.limit_price.unwrap_or_default(),
            },
        }
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        self.limit_price
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        self.stop_price
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn filled(&self) -> Decimal {
        self.filled
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }

    pub fn avg_fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price
    }

    pub fn commissions(&self) -> Decimal {
        self.commissions
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn good_till_canceled(&self) -> bool {
        self.good_till_canceled
    }

    pub fn all_or_none(&self) -> bool {
        self.all_or_none
    }

    pub fn set_good_till_canceled(&mut self, value: bool) {
        self.good_till_canceled = value;
    }

    pub fn set_all_or_none(&mut self, value: bool) {
        self.all_or_none = value;
    }

    /// Whether the stop price of a stop-limit order has been triggered
    pub fn stop_hit(&self) -> bool {
        self.stop_hit
    }

    pub fn set_stop_hit(&mut self, value: bool) {
        self.stop_hit = value;
    }

    /// Most recent fill
    pub fn last_execution(&self) -> Option<&ExecutionInfo> {
        self.last_execution.as_ref()
    }

    pub fn is_buy(&self) -> bool {
        self.action.is_buy()
    }

    pub fn is_initial(&self) -> bool {
        self.state == OrderState::Initial
    }

    pub fn is_submitted(&self) -> bool {
        self.state == OrderState::Submitted
    }

    pub fn is_accepted(&self) -> bool {
        self.state == OrderState::Accepted
    }

    pub fn is_partially_filled(&self) -> bool {
        self.state == OrderState::PartiallyFilled
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    pub fn is_canceled(&self) -> bool {
        self.state == OrderState::Canceled
    }

    /// Not yet filled or canceled
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn switch_state(&mut self, next: OrderState) -> Result<OrderState, OrderError> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: previous,
                to: next,
            });
        }
        self.state = next;
        Ok(previous)
    }

    /// INITIAL -> SUBMITTED with the brokerage id
    pub fn mark_submitted(
        &mut self,
        id: BrokerOrderId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.switch_state(OrderState::Submitted)?;
        self.id = Some(id);
        self.submitted_at = Some(at);
        Ok(())
    }

    /// Swap in the id the brokerage assigned after a modify or resubmission
    pub fn replace_id(&mut self, id: BrokerOrderId) {
        self.id = Some(id);
    }

    /// Change the price terms of a live order
    pub fn apply_modification(&mut self, spec: OrderSpec) -> Result<(), OrderError> {
        if !self.is_active() {
            return Err(OrderError::NotActive(self.state));
        }
        self.order_type = spec.order_type();
        self.limit_price = spec.limit_price();
        self.stop_price = spec.stop_price();
        self.stop_hit = false;
        Ok(())
    }

    /// Accumulate a fill; returns the resulting state
    pub fn add_execution_info(&mut self, info: ExecutionInfo) -> Result<OrderState, OrderError> {
        if info.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(info.quantity));
        }
        if info.quantity > self.remaining() {
            return Err(OrderError::Overfill {
                quantity: self.quantity,
                filled: self.filled,
                fill: info.quantity,
            });
        }

        let next = if info.quantity == self.remaining() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.switch_state(next)?;

        let notional = self.avg_fill_price.unwrap_or_default() * self.filled
            + info.price * info.quantity;
        self.filled += info.quantity;
        self.avg_fill_price = Some(notional / self.filled);
        self.commissions += info.commission;
        self.last_execution = Some(info);

        Ok(next)
    }
}
