//! Strategy runtime
//!
//! A [`Strategy`] reacts to bars and to position callbacks through a
//! [`StrategyContext`]. [`run_live`] drives it from a
//! [`LiveFeed`](crate::feed::LiveFeed); the
//! backtest driver lives in [`crate::backtest`].

mod context;
mod runner;

pub use context::StrategyContext;
pub use runner::{notify, run_live, LiveSettings};

use crate::bar::Bars;
use crate::broker::Broker;
use crate::position::{Position, PositionSignal};
use async_trait::async_trait;

/// A position callback owed to the strategy
#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub signal: PositionSignal,
    /// Position as it stood right after the transition
    pub position: Position,
}

/// Trading logic driven by bars and position transitions
///
/// Each callback fires exactly once per transition. Callbacks may trade
/// through `ctx`; errors they return stop the runner.
#[async_trait]
pub trait Strategy<B: Broker>: Send {
    async fn on_bars(&mut self, ctx: &mut StrategyContext<B>, bars: &Bars) -> anyhow::Result<()>;

    async fn on_enter_ok(
        &mut self,
        _ctx: &mut StrategyContext<B>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_enter_canceled(
        &mut self,
        _ctx: &mut StrategyContext<B>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_exit_ok(
        &mut self,
        _ctx: &mut StrategyContext<B>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_exit_canceled(
        &mut self,
        _ctx: &mut StrategyContext<B>,
        _position: &Position,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
