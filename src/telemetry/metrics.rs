//! Prometheus metrics

use crate::order::OrderEventType;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// One full reconciliation cycle
    MonitorPoll,
    /// Place-order round trip
    OrderSubmission,
    /// Bar synthesis from the quote board
    BarSynthesis,
}

impl LatencyMetric {
    const fn name(self) -> &'static str {
        match self {
            Self::MonitorPoll => "exec_core_monitor_poll_seconds",
            Self::OrderSubmission => "exec_core_order_submission_seconds",
            Self::BarSynthesis => "exec_core_bar_synthesis_seconds",
        }
    }
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Orders registered with the live broker
    ActiveOrders,
    /// Orders tracked by the reconciliation loop
    TrackedOrders,
    /// Positions not yet closed
    OpenPositions,
    /// Seconds since the last observed quote
    FeedStaleness,
}

impl GaugeMetric {
    const fn name(self) -> &'static str {
        match self {
            Self::ActiveOrders => "exec_core_active_orders",
            Self::TrackedOrders => "exec_core_tracked_orders",
            Self::OpenPositions => "exec_core_open_positions",
            Self::FeedStaleness => "exec_core_feed_staleness_seconds",
        }
    }
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    OrdersSubmitted,
    SubmissionFailures,
    /// Re-price or market conversion of a stale OPEN order
    Escalations,
    /// Re-placement after an unexpected cancel or reject
    Resubmissions,
    /// Local CANCELED forced after the retry budget ran out
    ForcedCancels,
    /// Failed order book fetches
    BookFetchFailures,
    /// Monitor reports for ids the broker no longer tracks
    UnknownOrderReports,
}

impl CounterMetric {
    const fn name(self) -> &'static str {
        match self {
            Self::OrdersSubmitted => "exec_core_orders_submitted_total",
            Self::SubmissionFailures => "exec_core_submission_failures_total",
            Self::Escalations => "exec_core_escalations_total",
            Self::Resubmissions => "exec_core_resubmissions_total",
            Self::ForcedCancels => "exec_core_forced_cancels_total",
            Self::BookFetchFailures => "exec_core_book_fetch_failures_total",
            Self::UnknownOrderReports => "exec_core_unknown_order_reports_total",
        }
    }
}

/// Register descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        CounterMetric::OrdersSubmitted.name(),
        "Orders accepted by the place-order primitive"
    );
    describe_counter!(
        CounterMetric::SubmissionFailures.name(),
        "Order submissions abandoned after a protocol error"
    );
    describe_counter!(
        CounterMetric::Escalations.name(),
        "Re-price or market conversions of stale open orders"
    );
    describe_counter!(
        CounterMetric::Resubmissions.name(),
        "Re-placements after unexpected cancels or rejects"
    );
    describe_counter!(
        CounterMetric::ForcedCancels.name(),
        "Orders force-canceled after exhausting retries"
    );
    describe_counter!(
        CounterMetric::BookFetchFailures.name(),
        "Failed order book fetches"
    );
    describe_counter!(
        CounterMetric::UnknownOrderReports.name(),
        "Monitor reports for untracked order ids"
    );
    describe_counter!("exec_core_order_events_total", "Order events by type");

    describe_gauge!(GaugeMetric::ActiveOrders.name(), "Registered active orders");
    describe_gauge!(GaugeMetric::TrackedOrders.name(), "Orders under reconciliation");
    describe_gauge!(GaugeMetric::OpenPositions.name(), "Positions not yet closed");
    describe_gauge!(
        GaugeMetric::FeedStaleness.name(),
        "Seconds since the last observed quote"
    );

    describe_histogram!(
        LatencyMetric::MonitorPoll.name(),
        "Duration of one reconciliation cycle"
    );
    describe_histogram!(
        LatencyMetric::OrderSubmission.name(),
        "Place-order round trip"
    );
    describe_histogram!(
        LatencyMetric::BarSynthesis.name(),
        "Bar synthesis from the quote board"
    );
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    histogram!(metric.name()).record(duration.as_secs_f64());
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    gauge!(metric.name()).set(value);
}

/// Bump a counter by one
pub fn increment(metric: CounterMetric) {
    counter!(metric.name()).increment(1);
}

/// Count one delivered order event
pub fn record_order_event(kind: OrderEventType) {
    let label = match kind {
        OrderEventType::Accepted => "accepted",
        OrderEventType::PartiallyFilled => "partially_filled",
        OrderEventType::Filled => "filled",
        OrderEventType::Canceled => "canceled",
    };
    counter!("exec_core_order_events_total", "type" => label).increment(1);
}
