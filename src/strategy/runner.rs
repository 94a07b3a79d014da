//! Live scheduling loop

use super::{PositionUpdate, Strategy, StrategyContext};
use crate::bar::Bars;
use crate::broker::{Broker, LiveBroker};
use crate::config::FeedConfig;
use crate::feed::LiveFeed;
use crate::position::PositionSignal;
use crate::telemetry::{set_gauge, GaugeMetric};
use crate::venue::BrokerageClient;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

/// Scheduler settings for [`run_live`]
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub tick_interval: Duration,
    pub liveness_threshold_secs: u64,
}

impl From<&FeedConfig> for LiveSettings {
    fn from(config: &FeedConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            liveness_threshold_secs: config.liveness_threshold_secs,
        }
    }
}

/// Deliver position callbacks in order
pub async fn notify<B, S>(
    strategy: &mut S,
    ctx: &mut StrategyContext<B>,
    updates: Vec<PositionUpdate>,
) -> anyhow::Result<()>
where
    B: Broker,
    S: Strategy<B> + ?Sized,
{
    for update in updates {
        let position = &update.position;
        match update.signal {
            PositionSignal::EnterOk => strategy.on_enter_ok(ctx, position).await?,
            PositionSignal::EnterCanceled => strategy.on_enter_canceled(ctx, position).await?,
            PositionSignal::ExitOk => strategy.on_exit_ok(ctx, position).await?,
            PositionSignal::ExitCanceled => strategy.on_exit_canceled(ctx, position).await?,
        }
    }
    Ok(())
}

/// Run `strategy` against live quotes until `shutdown` flips to true
///
/// Each tick polls the feed for new bars, hands them to the strategy and
/// then dispatches broker events. A stale feed is logged and exported as a
/// metric; trading continues.
pub async fn run_live<C, S>(
    strategy: &mut S,
    ctx: &mut StrategyContext<LiveBroker<C>>,
    feed: &mut LiveFeed,
    settings: &LiveSettings,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    C: BrokerageClient,
    S: Strategy<LiveBroker<C>> + ?Sized,
{
    let monitor = ctx.broker_mut().start();
    let mut interval = tokio::time::interval(settings.tick_interval);
    let mut was_alive = true;

    tracing::info!(
        tick_ms = settings.tick_interval.as_millis() as u64,
        frequency = ?feed.frequency(),
        "Live runner started"
    );

    let result = loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Received shutdown signal");
                    break Ok(());
                }
            }
            _ = interval.tick() => {
                let now = Utc::now();

                let alive = feed.is_data_feed_alive_at(now, settings.liveness_threshold_secs);
                if let Some(last) = feed.last_observed_at() {
                    set_gauge(
                        GaugeMetric::FeedStaleness,
                        (now - last).num_milliseconds() as f64 / 1000.0,
                    );
                }
                if alive != was_alive {
                    if alive {
                        tracing::info!("Data feed recovered");
                    } else {
                        tracing::warn!(
                            threshold_secs = settings.liveness_threshold_secs,
                            "Data feed is stale"
                        );
                    }
                    was_alive = alive;
                }

                let bars = feed.next_bars(now).unwrap_or_else(Bars::empty);
                if let Err(e) = step(strategy, ctx, &bars).await {
                    tracing::error!(error = %e, "Strategy failed, stopping");
                    break Err(e);
                }
            }
        }
    };

    if let Some(handle) = monitor {
        handle.abort();
    }
    tracing::info!(
        open_positions = ctx.open_positions(),
        closed_positions = ctx.closed_positions(),
        realized_pnl = %ctx.realized_pnl(),
        "Live runner stopped"
    );
    result
}

async fn step<B, S>(strategy: &mut S, ctx: &mut StrategyContext<B>, bars: &Bars) -> anyhow::Result<()>
where
    B: Broker,
    S: Strategy<B> + ?Sized,
{
    strategy.on_bars(ctx, bars).await?;
    let updates = ctx.dispatch().await;
    notify(strategy, ctx, updates).await
}
