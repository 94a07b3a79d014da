//! Live trading path against the in-memory brokerage
//!
//! The monitor is taken out of the broker and polled by hand with explicit
//! timestamps, so retry intervals are exercised without sleeping.

use chrono::{DateTime, Duration, TimeZone, Utc};
use exec_core::broker::{Broker, LiveBroker, TradeMonitor};
use exec_core::config::MonitorConfig;
use exec_core::order::{Action, OrderEventType, OrderType};
use exec_core::position::{PositionError, PositionSignal, PositionState};
use exec_core::strategy::{PositionUpdate, StrategyContext};
use exec_core::venue::MockBrokerage;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    ctx: StrategyContext<LiveBroker<MockBrokerage>>,
    monitor: TradeMonitor<MockBrokerage>,
    mock: Arc<MockBrokerage>,
}

impl Harness {
    fn new() -> Self {
        let config = MonitorConfig {
            retry_count: 3,
            retry_interval_secs: 5,
            poll_interval_ms: 1000,
            dispatch_wait_ms: 10,
            ..MonitorConfig::default()
        };
        let mock = Arc::new(MockBrokerage::new());
        let mut broker = LiveBroker::new(mock.clone(), &config);
        let monitor = broker.take_monitor().expect("monitor available once");
        Self {
            ctx: StrategyContext::new(broker),
            monitor,
            mock,
        }
    }

    /// One poll at `now` followed by one dispatch
    async fn cycle(&mut self, now: DateTime<Utc>) -> Vec<PositionUpdate> {
        self.monitor.poll_and_publish(now).await;
        self.ctx.dispatch().await
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap()
}

fn signals(updates: &[PositionUpdate]) -> Vec<PositionSignal> {
    updates.iter().map(|u| u.signal).collect()
}

#[tokio::test]
async fn test_submit_round_trip_accepts_once() {
    let mut h = Harness::new();
    let broker = h.ctx.broker_mut();
    let order = broker
        .create_limit_order(Action::Buy, "NSE:INFY", dec!(1500), dec!(1))
        .unwrap();
    let key = broker.submit_order(order).await.unwrap();
    assert_eq!(broker.order(key).unwrap().id(), Some("MOCK-1"));

    let events = broker.dispatch().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), OrderEventType::Accepted);
    assert_eq!(events[0].order().id(), Some("MOCK-1"));
    assert!(broker.dispatch().await.is_empty());
}

#[tokio::test]
async fn test_limit_entry_fill_then_split_exit() {
    let mut h = Harness::new();

    // Entry: 50-unit limit fills in full
    let id = h
        .ctx
        .enter_long_limit("NSE:INFY", dec!(1500), dec!(50))
        .await
        .unwrap();
    assert!(h.ctx.dispatch().await.is_empty());

    h.mock.fill("MOCK-1", dec!(50), dec!(1500)).await;
    let updates = h.cycle(t0()).await;
    assert_eq!(signals(&updates), vec![PositionSignal::EnterOk]);

    let position = h.ctx.position(id).unwrap();
    assert_eq!(position.state(), PositionState::Open);
    assert_eq!(position.shares(), dec!(50));
    assert!(h.cycle(t0() + Duration::seconds(1)).await.is_empty());

    // Exit at market; a second exit request must not place another order
    assert_ok!(h.ctx.exit_market(id).await);
    let again = h.ctx.exit_market(id).await;
    assert!(matches!(again, Err(PositionError::ExitActive(_))));
    assert_eq!(h.mock.placed().await.len(), 2);
    assert!(h.ctx.dispatch().await.is_empty());

    h.mock.fill("MOCK-2", dec!(30), dec!(1510)).await;
    assert!(h.cycle(t0() + Duration::seconds(2)).await.is_empty());
    assert_eq!(h.ctx.position(id).unwrap().shares(), dec!(20));

    h.mock.fill("MOCK-2", dec!(20), dec!(1510)).await;
    let updates = h.cycle(t0() + Duration::seconds(3)).await;
    assert_eq!(signals(&updates), vec![PositionSignal::ExitOk]);
    assert!(updates[0].position.shares().is_zero());
    assert_eq!(updates[0].position.state(), PositionState::Closed);

    assert!(h.ctx.position(id).is_none());
    assert_eq!(h.ctx.closed_positions(), 1);
    assert_eq!(h.ctx.realized_pnl(), dec!(500));
    assert!(h.cycle(t0() + Duration::seconds(4)).await.is_empty());
}

#[tokio::test]
async fn test_rejections_exhaust_into_single_cancel() {
    let mut h = Harness::new();
    h.mock.reject_new_orders(Some("Insufficient margin")).await;

    let id = h.ctx.enter_long_market("NSE:INFY", dec!(10)).await.unwrap();
    h.ctx.dispatch().await;

    let mut all = Vec::new();
    for step in 0..4 {
        all.extend(h.cycle(t0() + Duration::seconds(6 * step)).await);
    }

    assert_eq!(signals(&all), vec![PositionSignal::EnterCanceled]);
    // Original placement plus three resubmissions
    assert_eq!(h.mock.placed().await.len(), 4);
    assert_eq!(h.monitor.tracked_count(), 0);
    assert!(h.monitor.retry_record("MOCK-4").is_none());
    assert!(h.ctx.position(id).is_none());

    // Nothing more once the order is gone
    assert!(h.cycle(t0() + Duration::seconds(30)).await.is_empty());
    assert_eq!(h.mock.placed().await.len(), 4);
}

#[tokio::test]
async fn test_user_cancel_is_not_retried() {
    let mut h = Harness::new();
    let id = h
        .ctx
        .enter_long_limit("NSE:INFY", dec!(1400), dec!(5))
        .await
        .unwrap();
    h.ctx.dispatch().await;

    assert_ok!(h.ctx.exit_market(id).await);
    assert_eq!(h.mock.cancellations().await, vec!["MOCK-1".to_string()]);

    let updates = h.cycle(t0()).await;
    assert_eq!(signals(&updates), vec![PositionSignal::EnterCanceled]);
    assert_eq!(h.mock.placed().await.len(), 1);
}

#[tokio::test]
async fn test_stale_open_order_escalation_sequence() {
    let mut h = Harness::new();
    h.mock.set_last_price("NSE:INFY", dec!(1490)).await;
    h.ctx
        .enter_long_limit("NSE:INFY", dec!(1480), dec!(10))
        .await
        .unwrap();
    h.ctx.dispatch().await;

    // First sighting starts the clock; then three checks past the interval
    for step in 0..5 {
        h.cycle(t0() + Duration::seconds(6 * step)).await;
    }

    let modifications = h.mock.modifications().await;
    assert_eq!(modifications.len(), 3);

    let (id, reprice) = &modifications[0];
    assert_eq!(id, "MOCK-1");
    assert_eq!(reprice.order_type, OrderType::Limit);
    assert_eq!(reprice.limit_price, Some(dec!(1490)));
    assert_eq!(modifications[1].1.order_type, OrderType::Market);
    assert_eq!(modifications[2].1.order_type, OrderType::Market);
    assert_eq!(
        h.monitor.retry_record("MOCK-1").map(|r| r.retry_count),
        Some(3)
    );
}

#[tokio::test]
async fn test_escalates_once_in_eleven_seconds() {
    let mut h = Harness::new();
    h.mock.set_last_price("NSE:INFY", dec!(1490)).await;
    h.ctx
        .enter_long_limit("NSE:INFY", dec!(1480), dec!(10))
        .await
        .unwrap();
    h.ctx.dispatch().await;

    for second in 0..=11 {
        h.cycle(t0() + Duration::seconds(second)).await;
    }
    assert_eq!(h.mock.modifications().await.len(), 1);
}

#[tokio::test]
async fn test_unreadable_book_yields_no_event() {
    let mut h = Harness::new();
    h.mock.set_order_book_unavailable(true).await;
    let id = h.ctx.enter_long_market("NSE:INFY", dec!(1)).await.unwrap();
    h.ctx.dispatch().await;

    for step in 0..3 {
        assert!(h.cycle(t0() + Duration::seconds(10 * step)).await.is_empty());
    }
    assert_eq!(
        h.ctx.position(id).unwrap().state(),
        PositionState::WaitingEntry
    );
}

#[tokio::test]
async fn test_submission_failure_raises_without_position() {
    let mut h = Harness::new();
    h.mock.fail_next_submissions(1).await;

    let result = h.ctx.enter_long_market("NSE:INFY", dec!(1)).await;
    assert_err!(result);
    assert_eq!(h.ctx.open_positions(), 0);
    assert!(h.ctx.dispatch().await.is_empty());
}

#[tokio::test]
async fn test_modify_exit_keeps_tracking() {
    let mut h = Harness::new();
    h.mock.replace_ids_on_modify(true).await;

    let id = h.ctx.enter_long_market("NSE:INFY", dec!(4)).await.unwrap();
    h.ctx.dispatch().await;
    h.mock.fill("MOCK-1", dec!(4), dec!(100)).await;
    h.cycle(t0()).await;

    h.ctx.exit_limit(id, dec!(110)).await.unwrap();
    h.ctx.dispatch().await;
    h.ctx.modify_exit_to_limit(id, dec!(105)).await.unwrap();

    let exit_id = h
        .ctx
        .position(id)
        .unwrap()
        .exit_order()
        .and_then(|o| o.id().map(str::to_string))
        .unwrap();
    assert_ne!(exit_id, "MOCK-2");

    h.mock.fill(&exit_id, dec!(4), dec!(105)).await;
    let updates = h.cycle(t0() + Duration::seconds(1)).await;
    assert_eq!(signals(&updates), vec![PositionSignal::ExitOk]);
    assert_eq!(h.ctx.realized_pnl(), dec!(20));
}

#[tokio::test]
async fn test_exit_fill_in_flight_survives_modify() {
    let mut h = Harness::new();
    h.mock.replace_ids_on_modify(true).await;

    let id = h.ctx.enter_long_market("NSE:INFY", dec!(4)).await.unwrap();
    h.ctx.dispatch().await;
    h.mock.fill("MOCK-1", dec!(4), dec!(100)).await;
    h.cycle(t0()).await;

    h.ctx.exit_limit(id, dec!(110)).await.unwrap();
    h.ctx.dispatch().await;

    // Half the exit fills and is queued, then the exit is re-priced
    h.mock.fill("MOCK-2", dec!(2), dec!(110)).await;
    h.monitor.poll_and_publish(t0() + Duration::seconds(1)).await;
    h.ctx.modify_exit_to_limit(id, dec!(108)).await.unwrap();

    assert!(h.ctx.dispatch().await.is_empty());
    assert_eq!(h.ctx.position(id).unwrap().shares(), dec!(2));

    h.mock.fill("MOCK-3", dec!(2), dec!(108)).await;
    let updates = h.cycle(t0() + Duration::seconds(2)).await;
    assert_eq!(signals(&updates), vec![PositionSignal::ExitOk]);
    assert_eq!(h.ctx.realized_pnl(), dec!(36));
    assert!(h.ctx.broker().key_for("MOCK-2").is_none());
}
