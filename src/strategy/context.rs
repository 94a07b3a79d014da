//! Position registry and trading API handed to strategies

use super::PositionUpdate;
use crate::broker::Broker;
use crate::order::{Action, OrderEvent, OrderKey, OrderSpec};
use crate::position::{Position, PositionError, PositionId};
use crate::telemetry::{set_gauge, GaugeMetric};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, error, info};

/// Order keys of closed positions remembered for late-event reporting
const DEFAULT_TOMBSTONE_LIMIT: usize = 4096;

/// Owns the broker and every open position
///
/// Orders are routed to positions through an order-key index. Closed
/// positions are unregistered; their order keys stay behind as tombstones so
/// a late event for them is reported instead of dropped. Only the most
/// recent tombstones are kept.
pub struct StrategyContext<B: Broker> {
    broker: B,
    positions: BTreeMap<PositionId, Position>,
    by_order: HashMap<OrderKey, PositionId>,
    closed: HashMap<OrderKey, PositionId>,
    closed_order: VecDeque<OrderKey>,
    tombstone_limit: usize,
    next_id: u64,
    closed_count: usize,
    realized_pnl: Decimal,
}

impl<B: Broker> StrategyContext<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            positions: BTreeMap::new(),
            by_order: HashMap::new(),
            closed: HashMap::new(),
            closed_order: VecDeque::new(),
            tombstone_limit: DEFAULT_TOMBSTONE_LIMIT,
            next_id: 1,
            closed_count: 0,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Cap the number of closed-order keys remembered
    pub fn with_tombstone_limit(mut self, limit: usize) -> Self {
        self.tombstone_limit = limit;
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn into_broker(self) -> B {
        self.broker
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    /// Registered positions, oldest first
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn closed_positions(&self) -> usize {
        self.closed_count
    }

    /// P&L of every position closed so far
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub async fn enter_long_market(
        &mut self,
        instrument: &str,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        self.enter(Action::Buy, instrument, OrderSpec::Market, quantity)
            .await
    }

    pub async fn enter_long_limit(
        &mut self,
        instrument: &str,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        self.enter(Action::Buy, instrument, OrderSpec::Limit { limit }, quantity)
            .await
    }

    pub async fn enter_long_stop(
        &mut self,
        instrument: &str,
        stop: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        self.enter(Action::Buy, instrument, OrderSpec::Stop { stop }, quantity)
            .await
    }

    pub async fn enter_long_stop_limit(
        &mut self,
        instrument: &str,
        stop: Decimal,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        let spec = OrderSpec::StopLimit { stop, limit };
        self.enter(Action::Buy, instrument, spec, quantity).await
    }

    pub async fn enter_short_market(
        &mut self,
        instrument: &str,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        self.enter(Action::SellShort, instrument, OrderSpec::Market, quantity)
            .await
    }

    pub async fn enter_short_limit(
        &mut self,
        instrument: &str,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        let spec = OrderSpec::Limit { limit };
        self.enter(Action::SellShort, instrument, spec, quantity)
            .await
    }

    pub async fn enter_short_stop(
        &mut self,
        instrument: &str,
        stop: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        let spec = OrderSpec::Stop { stop };
        self.enter(Action::SellShort, instrument, spec, quantity)
            .await
    }

    pub async fn enter_short_stop_limit(
        &mut self,
        instrument: &str,
        stop: Decimal,
        limit: Decimal,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        let spec = OrderSpec::StopLimit { stop, limit };
        self.enter(Action::SellShort, instrument, spec, quantity)
            .await
    }

    async fn enter(
        &mut self,
        action: Action,
        instrument: &str,
        spec: OrderSpec,
        quantity: Decimal,
    ) -> Result<PositionId, PositionError> {
        let order = self
            .broker
            .create_order(action, instrument, spec, quantity)?;
        let id = PositionId::new(self.next_id);
        let position = Position::open(&mut self.broker, id, order).await?;
        self.next_id += 1;

        self.by_order.insert(position.entry_key(), id);
        self.positions.insert(id, position);
        set_gauge(GaugeMetric::OpenPositions, self.positions.len() as f64);
        Ok(id)
    }

    pub async fn exit_market(&mut self, id: PositionId) -> Result<(), PositionError> {
        self.exit(id, OrderSpec::Market).await
    }

    pub async fn exit_limit(&mut self, id: PositionId, limit: Decimal) -> Result<(), PositionError> {
        self.exit(id, OrderSpec::Limit { limit }).await
    }

    pub async fn exit_stop(&mut self, id: PositionId, stop: Decimal) -> Result<(), PositionError> {
        self.exit(id, OrderSpec::Stop { stop }).await
    }

    pub async fn exit_stop_limit(
        &mut self,
        id: PositionId,
        stop: Decimal,
        limit: Decimal,
    ) -> Result<(), PositionError> {
        self.exit(id, OrderSpec::StopLimit { stop, limit }).await
    }

    /// Exiting a position that already closed is a no-op
    async fn exit(&mut self, id: PositionId, spec: OrderSpec) -> Result<(), PositionError> {
        let Some(position) = self.positions.get_mut(&id) else {
            debug!(position = %id, "Exit requested for unregistered position");
            return Ok(());
        };
        if let Some(key) = position.exit(&mut self.broker, spec).await? {
            self.by_order.insert(key, id);
        }
        Ok(())
    }

    pub async fn modify_exit_to_market(&mut self, id: PositionId) -> Result<(), PositionError> {
        self.modify_exit(id, OrderSpec::Market).await
    }

    pub async fn modify_exit_to_limit(
        &mut self,
        id: PositionId,
        limit: Decimal,
    ) -> Result<(), PositionError> {
        self.modify_exit(id, OrderSpec::Limit { limit }).await
    }

    pub async fn modify_exit_to_stop(
        &mut self,
        id: PositionId,
        stop: Decimal,
    ) -> Result<(), PositionError> {
        self.modify_exit(id, OrderSpec::Stop { stop }).await
    }

    pub async fn modify_exit_to_stop_limit(
        &mut self,
        id: PositionId,
        stop: Decimal,
        limit: Decimal,
    ) -> Result<(), PositionError> {
        self.modify_exit(id, OrderSpec::StopLimit { stop, limit })
            .await
    }

    async fn modify_exit(&mut self, id: PositionId, spec: OrderSpec) -> Result<(), PositionError> {
        let position = self
            .positions
            .get_mut(&id)
            .ok_or(PositionError::Closed(id))?;
        position.modify_exit(&mut self.broker, spec).await
    }

    /// Pull pending order events from the broker and apply them
    ///
    /// Returns the callbacks owed to the strategy, in event order. Events that
    /// cannot be applied are logged at error level and skipped; events for
    /// orders no position owns are ignored.
    pub async fn dispatch(&mut self) -> Vec<PositionUpdate> {
        let events = self.broker.dispatch().await;
        let mut updates = Vec::new();
        for event in &events {
            match self.route(event) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e) => {
                    error!(order_key = %event.key(), kind = ?event.kind(), error = %e, "Order event rejected");
                }
            }
        }
        updates
    }

    fn route(&mut self, event: &OrderEvent) -> Result<Option<PositionUpdate>, PositionError> {
        let key = event.key();
        let id = match self.by_order.get(&key) {
            Some(id) => *id,
            None => {
                if let Some(id) = self.closed.get(&key) {
                    return Err(PositionError::Closed(*id));
                }
                debug!(order_key = %key, "Event for an order outside any position");
                return Ok(None);
            }
        };
        let Some(position) = self.positions.get_mut(&id) else {
            return Err(PositionError::Closed(id));
        };

        let Some(signal) = position.on_order_event(event)? else {
            return Ok(None);
        };
        let snapshot = position.clone();
        if !snapshot.is_open() {
            self.unregister(id);
        }
        Ok(Some(PositionUpdate {
            signal,
            position: snapshot,
        }))
    }

    fn unregister(&mut self, id: PositionId) {
        let Some(position) = self.positions.remove(&id) else {
            return;
        };
        for key in [Some(position.entry_key()), position.exit_key()]
            .into_iter()
            .flatten()
        {
            self.by_order.remove(&key);
            self.bury(key, id);
        }
        // Earlier exits canceled before the final one
        self.by_order.retain(|_, owner| *owner != id);

        let pnl = position.pnl().pnl(None);
        self.closed_count += 1;
        self.realized_pnl += pnl;
        set_gauge(GaugeMetric::OpenPositions, self.positions.len() as f64);
        info!(position = %id, instrument = %position.instrument(), pnl = %pnl, "Position closed");
    }

    fn bury(&mut self, key: OrderKey, id: PositionId) {
        self.closed.insert(key, id);
        self.closed_order.push_back(key);
        while self.closed_order.len() > self.tombstone_limit {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }
}
