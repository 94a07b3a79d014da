//! Backtesting module
//!
//! Replays historical bars through the same order and position model used
//! live, with fills simulated from each bar's range.

mod analytics;
mod broker;
mod commission;
mod fill;
mod simulator;

pub use analytics::{BacktestSummary, EquityTracker};
pub use broker::BacktestingBroker;
pub use commission::{Commission, FixedPerTrade, NoCommission, TradePercentage};
pub use fill::{DefaultFillStrategy, FillInfo, FillStrategy};
pub use simulator::run;
