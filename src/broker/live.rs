//! Live brokerage façade

use super::{
    Broker, BrokerError, MonitorBatch, MonitorCommand, MonitorReport, ReportKind, TradeMonitor,
};
use crate::config::MonitorConfig;
use crate::order::{
    Action, BrokerOrderId, ExecutionInfo, Order, OrderError, OrderEvent, OrderKey, OrderSpec,
    OrderState,
};
use crate::telemetry::{
    increment, record_latency, record_order_event, set_gauge, CounterMetric, GaugeMetric,
    LatencyMetric,
};
use crate::venue::{BrokerageClient, PlaceOrder};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Active-order registry entry
#[derive(Debug, Clone, Copy)]
struct Registration {
    key: OrderKey,
    /// Quantity already filled when this brokerage id was placed
    base_filled: Decimal,
}

/// Broker backed by a real (or mock) brokerage
///
/// Owns every order it submits in an arena keyed by [`OrderKey`] and maps
/// brokerage ids to keys for the orders still active. After a modify that
/// changes the id, the old id stays mapped as an alias until the monitor
/// retires it, so reports already queued under it still land. All order mutation
/// happens in [`Broker::dispatch`] on the caller's task; the reconciliation
/// loop only talks to it through channels.
pub struct LiveBroker<C: BrokerageClient> {
    client: Arc<C>,
    orders: HashMap<OrderKey, Order>,
    next_key: u64,
    active: HashMap<BrokerOrderId, Registration>,
    pending_accept: Vec<OrderKey>,
    monitor: Option<TradeMonitor<C>>,
    commands: mpsc::UnboundedSender<MonitorCommand>,
    batches: mpsc::Receiver<MonitorBatch>,
    dispatch_wait: Duration,
}

impl<C: BrokerageClient> LiveBroker<C> {
    pub fn new(client: Arc<C>, config: &MonitorConfig) -> Self {
        let (monitor, handle) = TradeMonitor::new(client.clone(), config);
        Self {
            client,
            orders: HashMap::new(),
            next_key: 0,
            active: HashMap::new(),
            pending_accept: Vec::new(),
            monitor: Some(monitor),
            commands: handle.commands,
            batches: handle.batches,
            dispatch_wait: config.dispatch_wait(),
        }
    }

    /// Spawn the reconciliation loop; `None` if already started or taken
    pub fn start(&mut self) -> Option<JoinHandle<()>> {
        self.monitor.take().map(|monitor| tokio::spawn(monitor.run()))
    }

    /// Take the monitor to drive polls by hand instead of [`LiveBroker::start`]
    pub fn take_monitor(&mut self) -> Option<TradeMonitor<C>> {
        self.monitor.take()
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Key of the active order currently placed under `id`
    pub fn key_for(&self, id: &str) -> Option<OrderKey> {
        self.active.get(id).map(|reg| reg.key)
    }

    fn allocate_key(&mut self) -> OrderKey {
        self.next_key += 1;
        OrderKey::new(self.next_key)
    }

    fn send_command(&self, command: MonitorCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Trade monitor is gone; order will not be reconciled");
        }
    }

    /// Registered brokerage id of an active order
    fn active_id(&self, key: OrderKey) -> Result<(BrokerOrderId, Registration), BrokerError> {
        let order = self.orders.get(&key).ok_or(BrokerError::UnknownOrder(key))?;
        if order.is_filled() {
            return Err(BrokerError::AlreadyFilled(key));
        }
        match order.id() {
            Some(id) if order.is_active() => self
                .active
                .get(id)
                .filter(|reg| reg.key == key)
                .map(|reg| (id.to_string(), *reg))
                .ok_or(BrokerError::NotActive(key)),
            _ => Err(BrokerError::NotActive(key)),
        }
    }

    /// Drop `id` if it only aliases an order now placed under another id
    fn retire_alias(&mut self, id: &str) {
        let is_alias = self.active.get(id).is_some_and(|reg| {
            self.orders.get(&reg.key).and_then(|order| order.id()) != Some(id)
        });
        if is_alias {
            tracing::debug!(order_id = %id, "Retiring replaced order id");
            self.active.remove(id);
        }
    }

    fn apply_report(&mut self, report: MonitorReport, events: &mut Vec<OrderEvent>) {
        if report.kind == ReportKind::Retired {
            self.retire_alias(&report.order_id);
            return;
        }
        let Some(registration) = self.active.get(&report.order_id).copied() else {
            increment(CounterMetric::UnknownOrderReports);
            tracing::warn!(order_id = %report.order_id, kind = ?report.kind, "Report for unknown order");
            return;
        };
        let key = registration.key;
        let Some(order) = self.orders.get_mut(&key) else {
            return;
        };

        match report.kind {
            ReportKind::Fill {
                price,
                quantity,
                complete,
            } => {
                if order.is_submitted() && order.switch_state(OrderState::Accepted).is_ok() {
                    events.push(OrderEvent::accepted(key, order.clone()));
                }

                let quantity = if complete {
                    order.remaining()
                } else {
                    quantity.min(order.remaining())
                };
                if quantity <= Decimal::ZERO {
                    return;
                }

                let info = ExecutionInfo {
                    price,
                    quantity,
                    commission: Decimal::ZERO,
                    date_time: report.at,
                };
                let old_state = order.state();
                match order.add_execution_info(info.clone()) {
                    Ok(new_state) => {
                        tracing::info!(
                            order_id = %report.order_id,
                            %key,
                            %old_state,
                            %new_state,
                            %price,
                            %quantity,
                            "Order fill"
                        );
                        events.push(OrderEvent::fill(key, order.clone(), info));
                    }
                    Err(e) => {
                        tracing::error!(order_id = %report.order_id, %key, error = %e, "Rejected fill");
                    }
                }
            }
            ReportKind::Canceled { reason, forced } => {
                if order.is_filled() {
                    tracing::info!(order_id = %report.order_id, %key, "Cancel lost the race to a fill");
                } else {
                    let old_state = order.state();
                    if order.switch_state(OrderState::Canceled).is_ok() {
                        tracing::info!(
                            order_id = %report.order_id,
                            %key,
                            %old_state,
                            new_state = %OrderState::Canceled,
                            reason = reason.as_deref().unwrap_or(""),
                            forced,
                            "Order canceled"
                        );
                        events.push(OrderEvent::canceled(key, order.clone(), reason));
                    }
                }
            }
            ReportKind::Replaced {
                new_id,
                resubmitted,
            } => {
                let base_filled = if resubmitted {
                    order.filled()
                } else {
                    registration.base_filled
                };
                tracing::info!(
                    order_id = %report.order_id,
                    new_order_id = %new_id,
                    %key,
                    resubmitted,
                    "Brokerage order id replaced"
                );
                order.replace_id(new_id.clone());
                self.active
                    .insert(new_id, Registration { key, base_filled });
                self.active.remove(&report.order_id);
                return;
            }
            ReportKind::Retired => return,
        }

        if !order.is_active() {
            self.active.retain(|_, reg| reg.key != key);
        }
    }
}

#[async_trait]
impl<C: BrokerageClient> Broker for LiveBroker<C> {
    /// Venues only speak BUY/SELL, so short-side actions are collapsed here
    fn create_order(
        &self,
        action: Action,
        instrument: &str,
        spec: OrderSpec,
        quantity: Decimal,
    ) -> Result<Order, OrderError> {
        Order::new(action.two_sided(), instrument, spec, quantity)
    }

    async fn submit_order(&mut self, mut order: Order) -> Result<OrderKey, BrokerError> {
        if !order.is_initial() {
            return Err(BrokerError::NotInitial(order.state()));
        }
        order.set_all_or_none(false);
        order.set_good_till_canceled(true);

        let request = PlaceOrder::from_order(&order);
        let started = Instant::now();
        let id = match self.client.place_order(&request).await {
            Ok(id) => id,
            Err(e) => {
                increment(CounterMetric::SubmissionFailures);
                tracing::error!(
                    instrument = %request.instrument,
                    action = ?request.action,
                    quantity = %request.quantity,
                    error = %e,
                    "Order submission failed"
                );
                return Err(BrokerError::Submission(e));
            }
        };
        record_latency(LatencyMetric::OrderSubmission, started.elapsed());
        increment(CounterMetric::OrdersSubmitted);

        let key = self.allocate_key();
        order.mark_submitted(id.clone(), Utc::now())?;
        tracing::info!(
            order_id = %id,
            %key,
            old_state = %OrderState::Initial,
            new_state = %OrderState::Submitted,
            "Order submitted"
        );

        self.orders.insert(key, order);
        self.active.insert(
            id.clone(),
            Registration {
                key,
                base_filled: Decimal::ZERO,
            },
        );
        self.pending_accept.push(key);
        self.send_command(MonitorCommand::Track { id, request });
        set_gauge(GaugeMetric::ActiveOrders, self.active.len() as f64);

        Ok(key)
    }

    async fn cancel_order(&mut self, key: OrderKey) -> Result<(), BrokerError> {
        let (id, _) = self.active_id(key)?;
        self.client
            .cancel_order(&id)
            .await
            .map_err(BrokerError::Submission)?;
        tracing::info!(order_id = %id, %key, "Cancel requested");
        Ok(())
    }

    async fn modify_order(&mut self, key: OrderKey, spec: OrderSpec) -> Result<(), BrokerError> {
        for price in [spec.limit_price(), spec.stop_price()].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidPrice(price).into());
            }
        }
        let (old_id, registration) = self.active_id(key)?;
        let order = self.orders.get(&key).ok_or(BrokerError::UnknownOrder(key))?;

        let mut request = PlaceOrder::from_order(order).with_spec(spec);
        request.quantity = order.quantity() - registration.base_filled;

        let new_id = self
            .client
            .modify_order(&old_id, &request)
            .await
            .map_err(BrokerError::Submission)?;

        // Old id stays as an alias until the monitor retires it
        self.active.insert(new_id.clone(), registration);
        if let Some(order) = self.orders.get_mut(&key) {
            order.replace_id(new_id.clone());
            order.apply_modification(spec)?;
        }
        tracing::info!(order_id = %new_id, previous = %old_id, %key, spec = ?spec, "Order modified");

        self.send_command(MonitorCommand::Replace {
            previous: old_id,
            id: new_id,
            request,
        });
        Ok(())
    }

    fn order(&self, key: OrderKey) -> Option<&Order> {
        self.orders.get(&key)
    }

    fn active_orders(&self) -> Vec<OrderKey> {
        let mut keys: Vec<OrderKey> = self
            .orders
            .iter()
            .filter(|(_, order)| order.is_active())
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    async fn dispatch(&mut self) -> Vec<OrderEvent> {
        let mut events = Vec::new();

        for key in std::mem::take(&mut self.pending_accept) {
            let Some(order) = self.orders.get_mut(&key) else {
                continue;
            };
            if order.is_submitted() && order.switch_state(OrderState::Accepted).is_ok() {
                tracing::info!(
                    order_id = order.id().unwrap_or_default(),
                    %key,
                    old_state = %OrderState::Submitted,
                    new_state = %OrderState::Accepted,
                    "Order accepted"
                );
                events.push(OrderEvent::accepted(key, order.clone()));
            }
        }

        let batch = if self.active.is_empty() {
            self.batches.try_recv().ok()
        } else {
            tokio::time::timeout(self.dispatch_wait, self.batches.recv())
                .await
                .ok()
                .flatten()
        };
        for report in batch.into_iter().flatten() {
            self.apply_report(report, &mut events);
        }

        for event in &events {
            record_order_event(event.kind());
        }
        set_gauge(GaugeMetric::ActiveOrders, self.active.len() as f64);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderEventType;
    use crate::venue::{MockBrokerage, VenueStatus};
    use rust_decimal_macros::dec;

    fn config() -> MonitorConfig {
        MonitorConfig {
            dispatch_wait_ms: 10,
            ..Default::default()
        }
    }

    fn setup() -> (LiveBroker<MockBrokerage>, TradeMonitor<MockBrokerage>, Arc<MockBrokerage>) {
        let mock = Arc::new(MockBrokerage::new());
        let mut broker = LiveBroker::new(mock.clone(), &config());
        let monitor = broker.take_monitor().unwrap();
        (broker, monitor, mock)
    }

    async fn submit_limit(broker: &mut LiveBroker<MockBrokerage>, qty: Decimal) -> OrderKey {
        let order = broker
            .create_limit_order(Action::Buy, "INFY", dec!(100), qty)
            .unwrap();
        broker.submit_order(order).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_dispatch_accepts_once() {
        let (mut broker, _monitor, mock) = setup();
        let key = submit_limit(&mut broker, dec!(10)).await;

        let order = broker.order(key).unwrap();
        assert!(order.is_submitted());
        assert!(order.good_till_canceled());
        assert_eq!(order.id(), Some("MOCK-1"));
        assert_eq!(mock.placed().await.len(), 1);

        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::Accepted);
        assert_eq!(events[0].order().id(), Some("MOCK-1"));

        assert!(broker.dispatch().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_order_collapses_short_side() {
        let (broker, _monitor, _mock) = setup();
        let order = broker
            .create_market_order(Action::SellShort, "INFY", dec!(1))
            .unwrap();
        assert_eq!(order.action(), Action::Sell);
        let order = broker
            .create_stop_order(Action::BuyToCover, "INFY", dec!(90), dec!(1))
            .unwrap();
        assert_eq!(order.action(), Action::Buy);
    }

    #[tokio::test]
    async fn test_resubmitting_fails() {
        let (mut broker, _monitor, _mock) = setup();
        let mut order = broker
            .create_market_order(Action::Buy, "INFY", dec!(1))
            .unwrap();
        order.mark_submitted("X".to_string(), Utc::now()).unwrap();
        let err = broker.submit_order(order).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotInitial(OrderState::Submitted)));
    }

    #[tokio::test]
    async fn test_protocol_error_yields_no_event() {
        let (mut broker, _monitor, mock) = setup();
        mock.fail_next_submissions(1).await;
        let order = broker
            .create_market_order(Action::Buy, "INFY", dec!(1))
            .unwrap();

        let err = broker.submit_order(order).await.unwrap_err();
        assert!(matches!(err, BrokerError::Submission(_)));
        assert!(broker.dispatch().await.is_empty());
        assert!(broker.active_orders().is_empty());
    }

    #[tokio::test]
    async fn test_partial_then_complete_fill() {
        let (mut broker, mut monitor, mock) = setup();
        let key = submit_limit(&mut broker, dec!(50)).await;
        broker.dispatch().await;

        mock.fill("MOCK-1", dec!(30), dec!(100)).await;
        monitor.poll_and_publish(Utc::now()).await;
        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::PartiallyFilled);
        assert_eq!(events[0].execution().unwrap().quantity, dec!(30));

        mock.fill("MOCK-1", dec!(20), dec!(106)).await;
        monitor.poll_and_publish(Utc::now()).await;
        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::Filled);
        assert_eq!(events[0].execution().unwrap().price, dec!(106));

        let order = broker.order(key).unwrap();
        assert_eq!(order.filled(), dec!(50));
        assert!(broker.key_for("MOCK-1").is_none());
        assert!(!monitor.is_tracking("MOCK-1"));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let (mut broker, mut monitor, mock) = setup();
        let key = submit_limit(&mut broker, dec!(5)).await;
        broker.dispatch().await;

        assert!(matches!(
            broker.cancel_order(OrderKey::new(99)).await,
            Err(BrokerError::UnknownOrder(_))
        ));

        mock.fill("MOCK-1", dec!(5), dec!(100)).await;
        monitor.poll_and_publish(Utc::now()).await;
        broker.dispatch().await;

        assert!(matches!(
            broker.cancel_order(key).await,
            Err(BrokerError::AlreadyFilled(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_confirmed_by_monitor() {
        let (mut broker, mut monitor, mock) = setup();
        let key = submit_limit(&mut broker, dec!(5)).await;
        broker.dispatch().await;

        broker.cancel_order(key).await.unwrap();
        assert!(broker.order(key).unwrap().is_accepted());
        assert_eq!(mock.cancellations().await, vec!["MOCK-1".to_string()]);

        monitor.poll_and_publish(Utc::now()).await;
        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::Canceled);
        assert!(broker.order(key).unwrap().is_canceled());
        assert!(matches!(
            broker.cancel_order(key).await,
            Err(BrokerError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_modify_swaps_registry() {
        let (mut broker, mut monitor, mock) = setup();
        mock.replace_ids_on_modify(true).await;
        let key = submit_limit(&mut broker, dec!(5)).await;
        broker.dispatch().await;

        broker
            .modify_order(key, OrderSpec::Limit { limit: dec!(101) })
            .await
            .unwrap();
        assert_eq!(broker.key_for("MOCK-2"), Some(key));
        assert_eq!(broker.key_for("MOCK-1"), Some(key));
        assert_eq!(broker.order(key).unwrap().limit_price(), Some(dec!(101)));

        monitor.poll_and_publish(Utc::now()).await;
        assert!(monitor.is_tracking("MOCK-2"));
        assert!(!monitor.is_tracking("MOCK-1"));

        assert!(broker.dispatch().await.is_empty());
        assert!(broker.key_for("MOCK-1").is_none());
        assert_eq!(broker.key_for("MOCK-2"), Some(key));
    }

    #[tokio::test]
    async fn test_fill_queued_before_modify_is_kept() {
        let (mut broker, mut monitor, mock) = setup();
        mock.replace_ids_on_modify(true).await;
        let key = submit_limit(&mut broker, dec!(10)).await;
        broker.dispatch().await;

        // Fill for MOCK-1 is queued, then the order moves to MOCK-2
        mock.fill("MOCK-1", dec!(2), dec!(100)).await;
        monitor.poll_and_publish(Utc::now()).await;
        broker
            .modify_order(key, OrderSpec::Limit { limit: dec!(99) })
            .await
            .unwrap();

        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::PartiallyFilled);
        assert_eq!(broker.order(key).unwrap().filled(), dec!(2));
        assert_eq!(broker.order(key).unwrap().id(), Some("MOCK-2"));

        // Monitor acknowledges the move; the rest fills under the new id
        monitor.poll_and_publish(Utc::now()).await;
        assert!(broker.dispatch().await.is_empty());
        assert!(broker.key_for("MOCK-1").is_none());

        mock.fill("MOCK-2", dec!(8), dec!(99)).await;
        monitor.poll_and_publish(Utc::now()).await;
        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::Filled);
        assert_eq!(events[0].execution().unwrap().quantity, dec!(8));
        assert_eq!(broker.order(key).unwrap().filled(), dec!(10));
        assert!(broker.key_for("MOCK-2").is_none());
    }

    #[tokio::test]
    async fn test_partial_fill_precedes_resubmission() {
        let (mut broker, mut monitor, mock) = setup();
        let key = submit_limit(&mut broker, dec!(10)).await;
        broker.dispatch().await;

        mock.fill("MOCK-1", dec!(4), dec!(100)).await;
        mock.set_status(
            "MOCK-1",
            VenueStatus::Rejected,
            dec!(4),
            Some(dec!(100)),
            Some("RMS: Margin exceeds"),
        )
        .await;

        // Poll clock well behind the brokerage's timestamps
        let earlier = Utc::now() - chrono::Duration::days(365);
        monitor.poll_and_publish(earlier).await;
        let events = broker.dispatch().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), OrderEventType::PartiallyFilled);

        let order = broker.order(key).unwrap();
        assert_eq!(order.filled(), dec!(4));
        assert_eq!(order.id(), Some("MOCK-2"));
        assert_eq!(mock.request("MOCK-2").await.unwrap().quantity, dec!(6));

        // A modify of the replacement only covers what is still open
        broker
            .modify_order(key, OrderSpec::Limit { limit: dec!(101) })
            .await
            .unwrap();
        let (_, request) = mock.modifications().await.pop().unwrap();
        assert_eq!(request.quantity, dec!(6));
    }

    #[tokio::test]
    async fn test_report_for_unknown_id_is_ignored() {
        let (mut broker, _monitor, _mock) = setup();
        let mut events = Vec::new();
        broker.apply_report(
            MonitorReport {
                order_id: "NOPE".to_string(),
                kind: ReportKind::Canceled {
                    reason: None,
                    forced: false,
                },
                at: Utc::now(),
            },
            &mut events,
        );
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_fill_resolves_to_filled() {
        let (mut broker, _monitor, _mock) = setup();
        let key = submit_limit(&mut broker, dec!(5)).await;
        broker.dispatch().await;

        let mut events = Vec::new();
        let at = Utc::now();
        broker.apply_report(
            MonitorReport {
                order_id: "MOCK-1".to_string(),
                kind: ReportKind::Fill {
                    price: dec!(100),
                    quantity: dec!(5),
                    complete: true,
                },
                at,
            },
            &mut events,
        );
        broker.apply_report(
            MonitorReport {
                order_id: "MOCK-1".to_string(),
                kind: ReportKind::Canceled {
                    reason: None,
                    forced: false,
                },
                at,
            },
            &mut events,
        );

        assert_eq!(events.len(), 1);
        assert!(broker.order(key).unwrap().is_filled());
    }
}
