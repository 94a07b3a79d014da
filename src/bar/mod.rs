//! Price bars
//!
//! Immutable OHLCV snapshots handed to strategies once per scheduler tick.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Bar period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Synthesized on demand from the latest quotes
    #[default]
    Realtime,
    /// One bar per trade
    Trade,
    Second,
    Minute,
    Hour,
    Day,
}

/// Bar construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarError {
    #[error("high < low for {instrument} at {date_time}")]
    HighBelowLow {
        instrument: String,
        date_time: DateTime<Utc>,
    },
    #[error("open/close outside high-low range for {instrument} at {date_time}")]
    OutsideRange {
        instrument: String,
        date_time: DateTime<Utc>,
    },
    #[error("negative volume for {0}")]
    NegativeVolume(String),
    #[error("bar for {instrument} is stamped {found}, expected {expected}")]
    MixedDateTimes {
        instrument: String,
        expected: DateTime<Utc>,
        found: DateTime<Utc>,
    },
}

/// One OHLCV snapshot for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    instrument: String,
    date_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    open_interest: Decimal,
    frequency: Frequency,
}

impl Bar {
    /// Build a bar, validating the OHLC relationships
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: impl Into<String>,
        date_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        open_interest: Decimal,
        frequency: Frequency,
    ) -> Result<Self, BarError> {
        let instrument = instrument.into();
        if high < low {
            return Err(BarError::HighBelowLow {
                instrument,
                date_time,
            });
        }
        if open > high || open < low || close > high || close < low {
            return Err(BarError::OutsideRange {
                instrument,
                date_time,
            });
        }
        if volume < Decimal::ZERO {
            return Err(BarError::NegativeVolume(instrument));
        }

        Ok(Self {
            instrument,
            date_time,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
            frequency,
        })
    }

    /// Degenerate bar where open, high, low and close all equal `price`
    pub fn from_price(
        instrument: impl Into<String>,
        date_time: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        open_interest: Decimal,
        frequency: Frequency,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            date_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            open_interest,
            frequency,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn open_interest(&self) -> Decimal {
        self.open_interest
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Typical price (high + low + close) / 3
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}

/// Bars for several instruments at the same instant
///
/// May be empty when the feed had nothing new for this tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bars {
    date_time: Option<DateTime<Utc>>,
    bars: BTreeMap<String, Bar>,
}

impl Bars {
    /// An empty mapping
    pub fn empty() -> Self {
        Self::default()
    }

    /// Group bars that share one timestamp
    pub fn new(bars: impl IntoIterator<Item = Bar>) -> Result<Self, BarError> {
        let mut date_time: Option<DateTime<Utc>> = None;
        let mut map = BTreeMap::new();

        for bar in bars {
            match date_time {
                Some(expected) if expected != bar.date_time => {
                    return Err(BarError::MixedDateTimes {
                        instrument: bar.instrument,
                        expected,
                        found: bar.date_time,
                    });
                }
                Some(_) => {}
                None => date_time = Some(bar.date_time),
            }
            map.insert(bar.instrument.clone(), bar);
        }

        Ok(Self {
            date_time,
            bars: map,
        })
    }

    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        self.date_time
    }

    pub fn get(&self, instrument: &str) -> Option<&Bar> {
        self.bars.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.values()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
