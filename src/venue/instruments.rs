//! Per-venue instrument metadata

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::HashMap;

/// Static metadata for one tradable instrument
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentSpec {
    /// Local symbol used by strategies
    pub symbol: String,
    /// Exchange segment (e.g. "NSE", "NFO")
    pub exchange: String,
    /// Venue trading symbol
    pub tradingsymbol: String,
    /// Ticker instrument token
    #[serde(default)]
    pub token: Option<u32>,
    /// Minimum price increment
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// Quantity must be a multiple of this
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
}

fn default_tick_size() -> Decimal {
    Decimal::new(5, 2) // 0.05
}
fn default_lot_size() -> Decimal {
    Decimal::ONE
}

impl InstrumentSpec {
    /// Create a spec with default tick and lot sizes
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        tradingsymbol: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            tradingsymbol: tradingsymbol.into(),
            token: None,
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
        }
    }

    /// Round a price to the nearest tick
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        let ticks = (price / self.tick_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (ticks * self.tick_size).normalize()
    }

    /// Whether `quantity` is a whole number of lots
    pub fn is_valid_quantity(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO
            && (self.lot_size <= Decimal::ZERO || (quantity % self.lot_size).is_zero())
    }

    /// "EXCHANGE:TRADINGSYMBOL" key used by quote endpoints
    pub fn quote_key(&self) -> String {
        format!("{}:{}", self.exchange, self.tradingsymbol)
    }
}

/// Instrument lookup injected into venue adapters
#[derive(Debug, Clone, Default)]
pub struct InstrumentTable {
    by_symbol: HashMap<String, InstrumentSpec>,
}

impl InstrumentTable {
    pub fn new(specs: impl IntoIterator<Item = InstrumentSpec>) -> Self {
        Self {
            by_symbol: specs
                .into_iter()
                .map(|spec| (spec.symbol.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.by_symbol.get(symbol)
    }

    /// Ticker token -> local symbol
    pub fn token_map(&self) -> HashMap<u32, String> {
        self.by_symbol
            .values()
            .filter_map(|spec| spec.token.map(|token| (token, spec.symbol.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}
