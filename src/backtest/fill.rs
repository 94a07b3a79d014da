//! Bar-driven fill simulation
//!
//! Decides whether, at what price and for how much an order fills against
//! one bar. Orders only ever see bars that close after they were placed.

use crate::bar::{Bar, Bars};
use crate::order::{Order, OrderType};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Price and size of a simulated fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillInfo {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Pluggable fill-price policy
pub trait FillStrategy: Send {
    /// Called once per bar set before any order is matched
    fn on_bars(&mut self, bars: &Bars);

    /// Match `order` against `bar`; may latch the order's stop-hit flag
    fn fill(&mut self, order: &mut Order, bar: &Bar) -> Option<FillInfo>;

    /// Called after a fill was applied to the broker's books
    fn on_order_filled(&mut self, order: &Order, fill: &FillInfo);
}

/// Fill policy with optional per-bar volume limit
///
/// | Order      | Fills when                     | Price                          |
/// |------------|--------------------------------|--------------------------------|
/// | Market     | always                         | open (or close)                |
/// | Limit      | bar trades through the limit   | open if it gapped, else limit  |
/// | Stop       | bar trades through the stop    | open if gapped, else stop      |
/// | Stop-limit | stop hit, then limit reachable | limit, bounded by the stop     |
#[derive(Debug, Clone, Default)]
pub struct DefaultFillStrategy {
    /// Fill market orders at the close instead of the open
    fill_on_close: bool,
    /// Fraction of bar volume available to this broker
    volume_limit: Option<Decimal>,
    volume_left: HashMap<String, Decimal>,
}

impl DefaultFillStrategy {
    pub fn new(fill_on_close: bool, volume_limit: Option<Decimal>) -> Self {
        Self {
            fill_on_close,
            volume_limit,
            volume_left: HashMap::new(),
        }
    }

    /// Quantity fillable now, honoring volume limit and all-or-none
    fn fill_size(&self, order: &Order, bar: &Bar) -> Option<Decimal> {
        let remaining = order.remaining();
        let size = match self.volume_limit {
            None => remaining,
            Some(_) => {
                let left = self
                    .volume_left
                    .get(bar.instrument())
                    .copied()
                    .unwrap_or_default();
                remaining.min(left.floor())
            }
        };

        if size <= Decimal::ZERO || (order.all_or_none() && size < remaining) {
            return None;
        }
        Some(size)
    }
}

impl FillStrategy for DefaultFillStrategy {
    fn on_bars(&mut self, bars: &Bars) {
        self.volume_left.clear();
        if let Some(limit) = self.volume_limit {
            for bar in bars.iter() {
                self.volume_left
                    .insert(bar.instrument().to_string(), bar.volume() * limit);
            }
        }
    }

    fn fill(&mut self, order: &mut Order, bar: &Bar) -> Option<FillInfo> {
        let is_buy = order.is_buy();
        let price = match order.order_type() {
            OrderType::Market => {
                if self.fill_on_close {
                    bar.close()
                } else {
                    bar.open()
                }
            }
            OrderType::Limit => limit_trigger(is_buy, order.limit_price()?, bar)?,
            OrderType::Stop => {
                let stop = order.stop_price()?;
                if order.stop_hit() {
                    // Triggered on an earlier bar, now a market order
                    bar.open()
                } else {
                    let price = stop_trigger(is_buy, stop, bar)?;
                    order.set_stop_hit(true);
                    price
                }
            }
            OrderType::StopLimit => {
                let stop = order.stop_price()?;
                let limit = order.limit_price()?;
                let mut stop_now = None;
                if !order.stop_hit() {
                    stop_now = stop_trigger(is_buy, stop, bar);
                    order.set_stop_hit(stop_now.is_some());
                }
                if !order.stop_hit() {
                    return None;
                }
                let price = limit_trigger(is_buy, limit, bar)?;
                match stop_now {
                    // Just triggered: the bar cannot have traded better than the stop
                    Some(trigger) if is_buy => trigger.min(limit),
                    Some(trigger) => trigger.max(limit),
                    None => price,
                }
            }
        };

        let quantity = self.fill_size(order, bar)?;
        Some(FillInfo { price, quantity })
    }

    fn on_order_filled(&mut self, order: &Order, fill: &FillInfo) {
        if self.volume_limit.is_some() {
            if let Some(left) = self.volume_left.get_mut(order.instrument()) {
                *left -= fill.quantity;
            }
        }
    }
}

/// Buy stops trigger on trades at or above the stop, sell stops at or below
fn stop_trigger(is_buy: bool, stop: Decimal, bar: &Bar) -> Option<Decimal> {
    if is_buy {
        if bar.open() >= stop {
            Some(bar.open())
        } else if bar.high() >= stop {
            Some(stop)
        } else {
            None
        }
    } else if bar.open() <= stop {
        Some(bar.open())
    } else if bar.low() <= stop {
        Some(stop)
    } else {
        None
    }
}

fn limit_trigger(is_buy: bool, limit: Decimal, bar: &Bar) -> Option<Decimal> {
    if is_buy {
        if bar.open() <= limit {
            Some(bar.open())
        } else if bar.low() <= limit {
            Some(limit)
        } else {
            None
        }
    } else if bar.open() >= limit {
        Some(bar.open())
    } else if bar.high() >= limit {
        Some(limit)
    } else {
        None
    }
}
