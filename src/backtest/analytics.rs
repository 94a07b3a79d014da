//! Backtest analytics and reporting

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Running equity high-water mark and drawdown
#[derive(Debug, Clone, Default)]
pub struct EquityTracker {
    peak: Decimal,
    max_drawdown: Decimal,
    max_drawdown_pct: Decimal,
    last: Decimal,
}

impl EquityTracker {
    pub fn new(initial: Decimal) -> Self {
        Self {
            peak: initial,
            last: initial,
            ..Self::default()
        }
    }

    pub fn record(&mut self, equity: Decimal) {
        self.last = equity;
        if equity > self.peak {
            self.peak = equity;
            return;
        }
        let drawdown = self.peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            if !self.peak.is_zero() {
                self.max_drawdown_pct = drawdown / self.peak;
            }
        }
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    pub fn max_drawdown_pct(&self) -> Decimal {
        self.max_drawdown_pct
    }

    pub fn last(&self) -> Decimal {
        self.last
    }
}

/// Summary statistics from a backtest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestSummary {
    /// Bar sets replayed
    pub bars_processed: usize,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    /// Final over initial equity, minus one
    pub total_return: Decimal,
    /// Maximum drawdown (absolute)
    pub max_drawdown: Decimal,
    /// Maximum drawdown (fraction of the peak)
    pub max_drawdown_pct: Decimal,
    pub closed_positions: usize,
    pub open_positions: usize,
    /// P&L of closed positions, net of commissions
    pub realized_pnl: Decimal,
}

impl BacktestSummary {
    /// Format as table for terminal output
    pub fn format_table(&self) -> String {
        format!(
            r#"
══════════════════════════════════════════════════════
               BACKTEST RESULTS
══════════════════════════════════════════════════════

PERFORMANCE
───────────────────────────────────────────────────────
Final Equity:     {:.2} ({:+.2}%)
Realized P&L:     {:+.2}
Max Drawdown:     {:.2} ({:.2}%)

ACTIVITY
───────────────────────────────────────────────────────
Bars:             {}
Closed Positions: {}
Open Positions:   {}
══════════════════════════════════════════════════════
"#,
            self.final_equity,
            self.total_return * dec!(100),
            self.realized_pnl,
            self.max_drawdown,
            self.max_drawdown_pct * dec!(100),
            self.bars_processed,
            self.closed_positions,
            self.open_positions,
        )
    }
}
