//! End-to-end: configuration file to a live round trip

use async_trait::async_trait;
use exec_core::backtest::BacktestingBroker;
use exec_core::bar::{Bars, Frequency};
use exec_core::broker::LiveBroker;
use exec_core::config::{Config, MonitorConfig};
use exec_core::feed::{LiveFeed, Quote};
use exec_core::position::Position;
use exec_core::strategy::{run_live, LiveSettings, Strategy, StrategyContext};
use exec_core::venue::{KiteConfig, MockBrokerage};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn example_config() -> Config {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.toml.example");
    Config::load(path).unwrap()
}

#[test]
fn test_example_config_wires_every_component() {
    let config = example_config();

    assert_eq!(config.monitor.retry_count, 3);
    assert_eq!(config.feed.frequency, Frequency::Realtime);
    assert_eq!(config.venue.instruments.len(), 2);

    let kite = KiteConfig::from(&config.venue);
    assert_eq!(kite.product, "MIS");
    assert_eq!(kite.instruments.token_map().len(), 1);
    let nifty = kite.instruments.get("NFO:NIFTY-FUT").unwrap();
    assert!(!nifty.is_valid_quantity(dec!(25)));
    assert!(nifty.is_valid_quantity(dec!(100)));

    let broker = BacktestingBroker::from_config(&config.backtest);
    assert_eq!(broker.cash(), dec!(1000000));

    let settings = LiveSettings::from(&config.feed);
    assert_eq!(settings.tick_interval, Duration::from_secs(1));
    assert_eq!(settings.liveness_threshold_secs, 30);
}

/// Buys once, exits as soon as the entry fills, stops the runner on exit
struct InAndOut {
    shutdown: watch::Sender<bool>,
    entered: bool,
    exit_pnl: Option<Decimal>,
}

#[async_trait]
impl Strategy<LiveBroker<MockBrokerage>> for InAndOut {
    async fn on_bars(
        &mut self,
        ctx: &mut StrategyContext<LiveBroker<MockBrokerage>>,
        bars: &Bars,
    ) -> anyhow::Result<()> {
        if !self.entered && bars.get("NSE:INFY").is_some() {
            ctx.enter_long_market("NSE:INFY", dec!(5)).await?;
            self.entered = true;
        }
        Ok(())
    }

    async fn on_enter_ok(
        &mut self,
        ctx: &mut StrategyContext<LiveBroker<MockBrokerage>>,
        position: &Position,
    ) -> anyhow::Result<()> {
        ctx.exit_market(position.id()).await?;
        Ok(())
    }

    async fn on_exit_ok(
        &mut self,
        _ctx: &mut StrategyContext<LiveBroker<MockBrokerage>>,
        position: &Position,
    ) -> anyhow::Result<()> {
        self.exit_pnl = Some(position.pnl().pnl(None));
        self.shutdown.send_replace(true);
        Ok(())
    }
}

/// Fill each order id once it has been placed
async fn fill_when_placed(mock: Arc<MockBrokerage>, fills: Vec<(&'static str, Decimal)>) {
    for (id, price) in fills {
        while mock.order(id).await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        mock.fill(id, dec!(5), price).await;
    }
}

#[tokio::test]
async fn test_live_round_trip_until_shutdown() {
    let monitor = MonitorConfig {
        poll_interval_ms: 20,
        dispatch_wait_ms: 5,
        ..MonitorConfig::default()
    };
    let mock = Arc::new(MockBrokerage::new());
    let mut ctx = StrategyContext::new(LiveBroker::new(mock.clone(), &monitor));

    let (mut feed, ingestor) = LiveFeed::new(Frequency::Realtime);
    ingestor.ingest(Quote {
        instrument: "NSE:INFY".to_string(),
        price: dec!(1500),
        volume: dec!(100),
        open_interest: dec!(0),
        exchange_timestamp: chrono::Utc::now(),
    });

    let (tx, rx) = watch::channel(false);
    let mut strategy = InAndOut {
        shutdown: tx,
        entered: false,
        exit_pnl: None,
    };
    let settings = LiveSettings {
        tick_interval: Duration::from_millis(10),
        liveness_threshold_secs: 30,
    };

    let filler = tokio::spawn(fill_when_placed(
        mock.clone(),
        vec![("MOCK-1", dec!(1500)), ("MOCK-2", dec!(1504))],
    ));
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_live(&mut strategy, &mut ctx, &mut feed, &settings, rx),
    )
    .await
    .expect("runner stops once the exit fills");

    assert!(result.is_ok());
    filler.await.unwrap();
    assert_eq!(strategy.exit_pnl, Some(dec!(20)));
    assert_eq!(ctx.closed_positions(), 1);
    assert_eq!(ctx.open_positions(), 0);
    assert_eq!(mock.placed().await.len(), 2);
}
