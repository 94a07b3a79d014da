//! Quote feed types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded state of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Local instrument symbol
    pub instrument: String,
    /// Last traded price
    pub price: Decimal,
    /// Cumulative traded volume for the day
    pub volume: Decimal,
    pub open_interest: Decimal,
    /// Exchange timestamp of the quote
    pub exchange_timestamp: DateTime<Utc>,
}
