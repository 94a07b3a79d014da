//! Strategies replayed over historical bars

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use exec_core::backtest::{self, BacktestingBroker, DefaultFillStrategy, FixedPerTrade};
use exec_core::bar::{Bar, Bars, Frequency};
use exec_core::config::BacktestConfig;
use exec_core::position::{Position, PositionId};
use exec_core::strategy::{Strategy, StrategyContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const INSTRUMENT: &str = "NSE:INFY";

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap() + Duration::days(n)
}

/// Daily bars opening at each price, with a one-rupee range either side
fn daily_bars(prices: &[Decimal]) -> Vec<Bars> {
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| {
            let bar = Bar::new(
                INSTRUMENT,
                day(i as i64),
                *price,
                price + dec!(1),
                price - dec!(1),
                *price,
                dec!(1000),
                dec!(0),
                Frequency::Day,
            )
            .unwrap();
            Bars::new([bar]).unwrap()
        })
        .collect()
}

/// Buys on the first bar and sells after holding for `hold` bars
#[derive(Default)]
struct HoldFor {
    hold: usize,
    bars_seen: usize,
    position: Option<PositionId>,
    entered_at: Option<usize>,
    exit_sent: bool,
    entries: usize,
    exits: usize,
    exit_pnl: Decimal,
}

#[async_trait]
impl Strategy<BacktestingBroker> for HoldFor {
    async fn on_bars(
        &mut self,
        ctx: &mut StrategyContext<BacktestingBroker>,
        _bars: &Bars,
    ) -> anyhow::Result<()> {
        self.bars_seen += 1;
        match (self.position, self.entered_at) {
            (None, _) => {
                self.position = Some(ctx.enter_long_market(INSTRUMENT, dec!(10)).await?);
            }
            (Some(id), Some(at)) if !self.exit_sent && self.bars_seen - at >= self.hold => {
                ctx.exit_market(id).await?;
                self.exit_sent = true;
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_enter_ok(
        &mut self,
        _ctx: &mut StrategyContext<BacktestingBroker>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        self.entries += 1;
        self.entered_at = Some(self.bars_seen);
        Ok(())
    }

    async fn on_exit_ok(
        &mut self,
        _ctx: &mut StrategyContext<BacktestingBroker>,
        position: &Position,
    ) -> anyhow::Result<()> {
        self.exits += 1;
        self.exit_pnl = position.pnl().pnl(None);
        Ok(())
    }
}

/// Rests a limit buy far below the market, then withdraws it
#[derive(Default)]
struct PatientBid {
    bars_seen: usize,
    position: Option<PositionId>,
    canceled: usize,
}

#[async_trait]
impl Strategy<BacktestingBroker> for PatientBid {
    async fn on_bars(
        &mut self,
        ctx: &mut StrategyContext<BacktestingBroker>,
        _bars: &Bars,
    ) -> anyhow::Result<()> {
        self.bars_seen += 1;
        match self.position {
            None => {
                let id = ctx
                    .enter_long_limit(INSTRUMENT, dec!(50), dec!(10))
                    .await?;
                self.position = Some(id);
            }
            Some(id) if self.bars_seen == 2 => ctx.exit_market(id).await?,
            Some(_) => {}
        }
        Ok(())
    }

    async fn on_enter_canceled(
        &mut self,
        _ctx: &mut StrategyContext<BacktestingBroker>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        self.canceled += 1;
        Ok(())
    }
}

#[tokio::test]
async fn test_hold_and_exit_round_trip() {
    let config = BacktestConfig {
        initial_cash: dec!(10000),
        ..BacktestConfig::default()
    };
    let mut ctx = StrategyContext::new(BacktestingBroker::from_config(&config));
    let mut strategy = HoldFor {
        hold: 2,
        ..HoldFor::default()
    };

    let feed = daily_bars(&[dec!(100), dec!(101), dec!(103), dec!(104), dec!(102)]);
    let summary = backtest::run(&mut strategy, &mut ctx, feed).await.unwrap();

    // Entry fills at day 2's open, exit at day 4's open
    assert_eq!(strategy.entries, 1);
    assert_eq!(strategy.exits, 1);
    assert_eq!(strategy.exit_pnl, dec!(30));

    assert_eq!(summary.bars_processed, 5);
    assert_eq!(summary.closed_positions, 1);
    assert_eq!(summary.open_positions, 0);
    assert_eq!(summary.realized_pnl, dec!(30));
    assert_eq!(summary.final_equity, dec!(10030));
    assert_eq!(summary.total_return, dec!(0.003));
    assert!(summary.max_drawdown.is_zero());
    assert_eq!(ctx.broker().shares(INSTRUMENT), dec!(0));
    assert!(summary.format_table().contains("10030"));
}

#[tokio::test]
async fn test_commission_reduces_realized_pnl() {
    let broker = BacktestingBroker::new(
        dec!(10000),
        DefaultFillStrategy::new(false, None),
        Box::new(FixedPerTrade { amount: dec!(2) }),
    );
    let mut ctx = StrategyContext::new(broker);
    let mut strategy = HoldFor {
        hold: 1,
        ..HoldFor::default()
    };

    let feed = daily_bars(&[dec!(100), dec!(100), dec!(105), dec!(105)]);
    let summary = backtest::run(&mut strategy, &mut ctx, feed).await.unwrap();

    // 10 shares bought at 100, sold at 105, two fixed fees
    assert_eq!(summary.realized_pnl, dec!(46));
    assert_eq!(summary.final_equity, dec!(10046));
}

#[tokio::test]
async fn test_unfilled_entry_withdrawn() {
    let mut ctx = StrategyContext::new(BacktestingBroker::from_config(&BacktestConfig::default()));
    let mut strategy = PatientBid::default();

    let feed = daily_bars(&[dec!(100), dec!(100), dec!(100)]);
    let summary = backtest::run(&mut strategy, &mut ctx, feed).await.unwrap();

    assert_eq!(strategy.canceled, 1);
    assert_eq!(summary.closed_positions, 1);
    assert!(summary.realized_pnl.is_zero());
    assert_eq!(summary.final_equity, summary.initial_equity);
}
