//! Backtest driver

use super::analytics::{BacktestSummary, EquityTracker};
use super::broker::BacktestingBroker;
use super::fill::FillStrategy;
use crate::bar::Bars;
use crate::strategy::{notify, Strategy, StrategyContext};
use rust_decimal::Decimal;

/// Replay `feed` through `strategy`
///
/// Per bar set: the broker matches pending orders, resulting callbacks are
/// delivered, the strategy sees the bars, and the orders it placed are
/// accepted before the next bar set.
pub async fn run<S, F, I>(
    strategy: &mut S,
    ctx: &mut StrategyContext<BacktestingBroker<F>>,
    feed: I,
) -> anyhow::Result<BacktestSummary>
where
    S: Strategy<BacktestingBroker<F>> + ?Sized,
    F: FillStrategy,
    I: IntoIterator<Item = Bars>,
{
    let initial = ctx.broker().equity();
    let mut equity = EquityTracker::new(initial);
    let mut bars_processed = 0usize;

    for bars in feed {
        if bars.is_empty() {
            continue;
        }
        ctx.broker_mut().on_bars(&bars);
        let updates = ctx.dispatch().await;
        notify(strategy, ctx, updates).await?;

        strategy.on_bars(ctx, &bars).await?;
        let updates = ctx.dispatch().await;
        notify(strategy, ctx, updates).await?;

        equity.record(ctx.broker().equity());
        bars_processed += 1;
    }

    let final_equity = equity.last();
    let total_return = if initial.is_zero() {
        Decimal::ZERO
    } else {
        final_equity / initial - Decimal::ONE
    };

    let summary = BacktestSummary {
        bars_processed,
        initial_equity: initial,
        final_equity,
        total_return,
        max_drawdown: equity.max_drawdown(),
        max_drawdown_pct: equity.max_drawdown_pct(),
        closed_positions: ctx.closed_positions(),
        open_positions: ctx.open_positions(),
        realized_pnl: ctx.realized_pnl(),
    };
    tracing::info!(
        bars = summary.bars_processed,
        final_equity = %summary.final_equity,
        realized_pnl = %summary.realized_pnl,
        "Backtest finished"
    );
    Ok(summary)
}
