//! Live quote feed
//!
//! Streams quotes from a venue into a last-known-quote board and synthesizes
//! one bar per instrument per scheduler tick from it.

mod live;
pub mod ticker;
mod types;

pub use live::{LiveFeed, QuoteIngestor};
pub use ticker::{TickerConfig, TickerSource};
pub use types::Quote;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for push-based quote sources
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Subscribe to quote updates
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<Quote>>;
}
