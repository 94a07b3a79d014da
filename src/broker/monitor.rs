//! Brokerage order book reconciliation
//!
//! [`TradeMonitor`] polls the order book on a fixed interval, compares it with
//! the orders the live broker asked it to track, applies the retry policy and
//! publishes what changed as [`MonitorReport`] batches. It is the only
//! producer on the batch queue; the live broker is the only consumer.

use super::retry::{cancel_action, CancelAction, Escalation, RetryPolicy, RetryRecord};
use crate::config::MonitorConfig;
use crate::order::{BrokerOrderId, OrderSpec};
use crate::telemetry::{
    increment, record_latency, set_gauge, CounterMetric, GaugeMetric, LatencyMetric,
};
use crate::venue::{BrokerageClient, BrokerageOrder, PlaceOrder, VenueError, VenueStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Polls a force-canceled id stays under watch for a late COMPLETE
const FORCED_WATCH_CYCLES: u32 = 10;

/// Instructions from the live broker
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    /// Start reconciling a freshly placed order
    Track { id: BrokerOrderId, request: PlaceOrder },
    /// The broker modified an order; `id` may equal `previous`
    Replace {
        previous: BrokerOrderId,
        id: BrokerOrderId,
        request: PlaceOrder,
    },
}

/// What the monitor observed for one order
#[derive(Debug, Clone, PartialEq)]
pub enum ReportKind {
    /// Executed quantity grew by `quantity` at `price`
    Fill {
        price: Decimal,
        quantity: Decimal,
        /// Brokerage reports the order COMPLETE
        complete: bool,
    },
    Canceled {
        reason: Option<String>,
        /// Canceled locally after the retry budget ran out
        forced: bool,
    },
    /// Order now lives under `new_id` at the brokerage
    Replaced {
        new_id: BrokerOrderId,
        /// A fresh placement for the unfilled remainder rather than a modify
        resubmitted: bool,
    },
    /// The monitor took over a broker-side modify and no longer reports
    /// under this id
    Retired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub order_id: BrokerOrderId,
    pub kind: ReportKind,
    pub at: DateTime<Utc>,
}

/// Reports from one poll cycle, oldest first
///
/// Reports for one order share the brokerage timestamp of its book row, so
/// the stable sort keeps them in the order they were produced.
pub type MonitorBatch = Vec<MonitorReport>;

/// Broker-side ends of the monitor channels
pub struct MonitorHandle {
    pub commands: mpsc::UnboundedSender<MonitorCommand>,
    pub batches: mpsc::Receiver<MonitorBatch>,
}

#[derive(Debug, Clone)]
struct TrackedOrder {
    request: PlaceOrder,
    filled: Decimal,
    avg_price: Option<Decimal>,
}

impl TrackedOrder {
    fn new(request: PlaceOrder) -> Self {
        Self {
            request,
            filled: Decimal::ZERO,
            avg_price: None,
        }
    }

    /// Fill delta since the last cycle, priced from the change in average price
    fn fill_delta(&mut self, book: &BrokerageOrder) -> Option<(Decimal, Decimal)> {
        let quantity = book.filled_quantity - self.filled;
        if quantity <= Decimal::ZERO {
            return None;
        }

        let avg = book
            .average_price
            .or(self.request.limit_price)
            .unwrap_or_default();
        let notional = avg * book.filled_quantity - self.avg_price.unwrap_or_default() * self.filled;
        let price = notional / quantity;

        self.filled = book.filled_quantity;
        self.avg_price = Some(avg);
        Some((price, quantity))
    }
}

/// Background reconciliation loop
pub struct TradeMonitor<C: BrokerageClient> {
    client: Arc<C>,
    policy: RetryPolicy,
    poll_interval: Duration,
    commands: mpsc::UnboundedReceiver<MonitorCommand>,
    commands_closed: bool,
    batches: mpsc::Sender<MonitorBatch>,
    tracked: HashMap<BrokerOrderId, TrackedOrder>,
    retries: HashMap<BrokerOrderId, RetryRecord>,
    /// Force-canceled ids and the polls left to watch them
    force_canceled: HashMap<BrokerOrderId, u32>,
}

impl<C: BrokerageClient> TradeMonitor<C> {
    pub fn new(client: Arc<C>, config: &MonitorConfig) -> (Self, MonitorHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::channel(config.queue_capacity.max(1));

        let monitor = Self {
            client,
            policy: RetryPolicy::from(config),
            poll_interval: config.poll_interval(),
            commands: command_rx,
            commands_closed: false,
            batches: batch_tx,
            tracked: HashMap::new(),
            retries: HashMap::new(),
            force_canceled: HashMap::new(),
        };
        let handle = MonitorHandle {
            commands: command_tx,
            batches: batch_rx,
        };
        (monitor, handle)
    }

    /// Orders currently under reconciliation
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_tracking(&self, id: &str) -> bool {
        self.tracked.contains_key(id)
    }

    pub fn retry_record(&self, id: &str) -> Option<&RetryRecord> {
        self.retries.get(id)
    }

    /// Force-canceled ids still checked for a late COMPLETE
    pub fn watched_forced_cancels(&self) -> usize {
        self.force_canceled.len()
    }

    /// Apply queued commands; acknowledges every id a modify moved away from
    fn drain_commands(&mut self, now: DateTime<Utc>) -> MonitorBatch {
        let mut retired = Vec::new();
        loop {
            match self.commands.try_recv() {
                Ok(MonitorCommand::Track { id, request }) => {
                    tracing::debug!(order_id = %id, "Tracking order");
                    self.tracked.insert(id, TrackedOrder::new(request));
                }
                Ok(MonitorCommand::Replace {
                    previous,
                    id,
                    request,
                }) => {
                    tracing::debug!(order_id = %id, previous = %previous, "Tracking modified order");
                    let mut tracked = self
                        .tracked
                        .remove(&previous)
                        .unwrap_or_else(|| TrackedOrder::new(request.clone()));
                    tracked.request = request;
                    if previous != id {
                        if let Some(record) = self.retries.remove(&previous) {
                            self.retries.insert(id.clone(), record);
                        }
                        retired.push(MonitorReport {
                            order_id: previous,
                            kind: ReportKind::Retired,
                            at: now,
                        });
                    }
                    self.tracked.insert(id, tracked);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.commands_closed = true;
                    break;
                }
            }
        }
        retired
    }

    /// Run one reconciliation cycle at `now`
    ///
    /// Never fails: a failed book fetch yields only modify acknowledgements and per-order
    /// errors are logged without affecting other orders.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> MonitorBatch {
        let started = Instant::now();
        let mut reports = self.drain_commands(now);

        if self.tracked.is_empty() && self.force_canceled.is_empty() {
            return reports;
        }

        let book = match self.client.order_book().await {
            Ok(book) => book,
            Err(e) => {
                increment(CounterMetric::BookFetchFailures);
                tracing::warn!(error = %e, "Order book fetch failed, skipping cycle");
                return reports;
            }
        };
        let book: HashMap<&str, &BrokerageOrder> =
            book.iter().map(|order| (order.id.as_str(), order)).collect();

        self.check_force_canceled(&book);

        let mut ids: Vec<BrokerOrderId> = self.tracked.keys().cloned().collect();
        ids.sort();

        for id in ids {
            let Some(entry) = book.get(id.as_str()) else {
                tracing::trace!(order_id = %id, "Order not in book yet");
                continue;
            };
            if let Err(e) = self.reconcile(&id, entry, now, &mut reports).await {
                tracing::error!(order_id = %id, error = %e, "Reconciliation failed for order");
            }
        }

        reports.sort_by_key(|report| report.at);
        set_gauge(GaugeMetric::TrackedOrders, self.tracked.len() as f64);
        record_latency(LatencyMetric::MonitorPoll, started.elapsed());
        reports
    }

    /// Poll and queue the batch; false once the consumer is gone
    pub async fn poll_and_publish(&mut self, now: DateTime<Utc>) -> bool {
        let batch = self.poll_once(now).await;
        if batch.is_empty() {
            return !self.batches.is_closed();
        }
        self.batches.send(batch).await.is_ok()
    }

    /// Poll until the broker drops its handle
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(poll_interval = ?self.poll_interval, "Trade monitor started");
        loop {
            interval.tick().await;
            if !self.poll_and_publish(Utc::now()).await {
                break;
            }
            if self.commands_closed && self.tracked.is_empty() {
                break;
            }
        }
        tracing::info!("Trade monitor stopped");
    }

    fn check_force_canceled(&mut self, book: &HashMap<&str, &BrokerageOrder>) {
        self.force_canceled
            .retain(|id, cycles_left| match book.get(id.as_str()) {
                Some(entry) if entry.status == VenueStatus::Complete => {
                    tracing::error!(
                        order_id = %id,
                        filled = %entry.filled_quantity,
                        "Force-canceled order was filled at the brokerage; local state is out of sync"
                    );
                    false
                }
                _ => {
                    *cycles_left = cycles_left.saturating_sub(1);
                    *cycles_left > 0
                }
            });
    }

    async fn reconcile(
        &mut self,
        id: &BrokerOrderId,
        entry: &BrokerageOrder,
        now: DateTime<Utc>,
        reports: &mut MonitorBatch,
    ) -> Result<(), VenueError> {
        self.retries
            .entry(id.clone())
            .or_insert_with(|| RetryRecord::new(now));

        match entry.status {
            VenueStatus::Pending | VenueStatus::TriggerPending => Ok(()),
            VenueStatus::Open => {
                self.push_fill_delta(id, entry, reports);
                self.escalate_if_due(id, entry, now, reports).await
            }
            VenueStatus::Canceled | VenueStatus::Rejected => {
                self.push_fill_delta(id, entry, reports);
                self.handle_cancel(id, entry, now, reports).await
            }
            VenueStatus::Complete => {
                let (price, quantity) = match self.tracked.get_mut(id) {
                    Some(tracked) => tracked
                        .fill_delta(entry)
                        .unwrap_or((tracked.avg_price.unwrap_or_default(), Decimal::ZERO)),
                    None => return Ok(()),
                };
                tracing::info!(order_id = %id, %quantity, %price, "Order complete at brokerage");
                reports.push(MonitorReport {
                    order_id: id.clone(),
                    kind: ReportKind::Fill {
                        price,
                        quantity,
                        complete: true,
                    },
                    at: entry.updated_at,
                });
                self.forget(id);
                Ok(())
            }
        }
    }

    fn push_fill_delta(
        &mut self,
        id: &BrokerOrderId,
        entry: &BrokerageOrder,
        reports: &mut MonitorBatch,
    ) {
        let Some((price, quantity)) = self.tracked.get_mut(id).and_then(|t| t.fill_delta(entry))
        else {
            return;
        };
        tracing::info!(order_id = %id, %quantity, %price, "Partial fill");
        reports.push(MonitorReport {
            order_id: id.clone(),
            kind: ReportKind::Fill {
                price,
                quantity,
                complete: false,
            },
            at: entry.updated_at,
        });
    }

    async fn escalate_if_due(
        &mut self,
        id: &BrokerOrderId,
        entry: &BrokerageOrder,
        now: DateTime<Utc>,
        reports: &mut MonitorBatch,
    ) -> Result<(), VenueError> {
        let Some(record) = self.retries.get(id) else {
            return Ok(());
        };
        if !record.interval_elapsed(now, &self.policy) {
            return Ok(());
        }
        if record.is_exhausted(&self.policy) {
            tracing::debug!(order_id = %id, "Escalation budget spent, leaving order working");
            return Ok(());
        }

        let attempt = record.retry_count;
        let step = record.escalation();
        if let Some(record) = self.retries.get_mut(id) {
            record.bump(now);
        }
        increment(CounterMetric::Escalations);

        let Some(tracked) = self.tracked.get(id) else {
            return Ok(());
        };
        let request = tracked.request.clone();
        let escalated = match step {
            Escalation::Reprice => {
                match self.client.last_traded_price(&request.instrument).await {
                    Ok(ltp) => request.with_spec(OrderSpec::Limit { limit: ltp }),
                    Err(e) => {
                        tracing::warn!(order_id = %id, attempt, error = %e, "No LTP for re-price");
                        return Ok(());
                    }
                }
            }
            Escalation::Market => request.with_spec(OrderSpec::Market),
        };

        tracing::info!(
            order_id = %id,
            attempt,
            step = ?step,
            limit = ?escalated.limit_price,
            "Escalating stale open order"
        );

        let new_id = match self.client.modify_order(id, &escalated).await {
            Ok(new_id) => new_id,
            Err(e) => {
                tracing::warn!(order_id = %id, attempt, error = %e, "Escalation failed");
                return Ok(());
            }
        };

        if let Some(tracked) = self.tracked.get_mut(id) {
            tracked.request = escalated;
        }
        if new_id != *id {
            self.move_to(id, &new_id, false);
            reports.push(MonitorReport {
                order_id: id.clone(),
                kind: ReportKind::Replaced {
                    new_id,
                    resubmitted: false,
                },
                at: entry.updated_at,
            });
        }
        Ok(())
    }

    async fn handle_cancel(
        &mut self,
        id: &BrokerOrderId,
        entry: &BrokerageOrder,
        now: DateTime<Utc>,
        reports: &mut MonitorBatch,
    ) -> Result<(), VenueError> {
        let Some(record) = self.retries.get(id) else {
            return Ok(());
        };
        let reason = entry.status_message.as_deref();

        match cancel_action(reason, record, &self.policy, now) {
            CancelAction::Wait => Ok(()),
            CancelAction::Accept => {
                tracing::info!(
                    order_id = %id,
                    status = %entry.raw_status,
                    reason = reason.unwrap_or(""),
                    "Order canceled at brokerage"
                );
                reports.push(MonitorReport {
                    order_id: id.clone(),
                    kind: ReportKind::Canceled {
                        reason: reason.map(str::to_string),
                        forced: false,
                    },
                    at: entry.updated_at,
                });
                self.forget(id);
                Ok(())
            }
            CancelAction::Force => {
                tracing::warn!(
                    order_id = %id,
                    attempt = record.retry_count,
                    reason = reason.unwrap_or(""),
                    "Retries exhausted, forcing cancel"
                );
                increment(CounterMetric::ForcedCancels);
                reports.push(MonitorReport {
                    order_id: id.clone(),
                    kind: ReportKind::Canceled {
                        reason: reason.map(str::to_string),
                        forced: true,
                    },
                    at: entry.updated_at,
                });
                self.forget(id);
                self.force_canceled.insert(id.clone(), FORCED_WATCH_CYCLES);
                Ok(())
            }
            CancelAction::Resubmit => {
                let attempt = record.retry_count;
                if let Some(record) = self.retries.get_mut(id) {
                    record.bump(now);
                }

                let Some(tracked) = self.tracked.get(id) else {
                    return Ok(());
                };
                let mut request = tracked.request.clone();
                request.quantity -= tracked.filled;

                tracing::info!(
                    order_id = %id,
                    attempt,
                    reason = reason.unwrap_or(""),
                    quantity = %request.quantity,
                    "Resubmitting canceled order"
                );
                increment(CounterMetric::Resubmissions);

                let new_id = self.client.place_order(&request).await?;
                if let Some(tracked) = self.tracked.get_mut(id) {
                    tracked.request = request;
                }
                self.move_to(id, &new_id, true);
                reports.push(MonitorReport {
                    order_id: id.clone(),
                    kind: ReportKind::Replaced {
                        new_id,
                        resubmitted: true,
                    },
                    at: entry.updated_at,
                });
                Ok(())
            }
        }
    }

    /// Re-key tracking and retry state from `old` to `new`
    fn move_to(&mut self, old: &str, new: &str, reset_fills: bool) {
        if let Some(mut tracked) = self.tracked.remove(old) {
            if reset_fills {
                tracked.filled = Decimal::ZERO;
                tracked.avg_price = None;
            }
            self.tracked.insert(new.to_string(), tracked);
        }
        if let Some(record) = self.retries.remove(old) {
            self.retries.insert(new.to_string(), record);
        }
    }

    fn forget(&mut self, id: &str) {
        self.tracked.remove(id);
        self.retries.remove(id);
    }
}
