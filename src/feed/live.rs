//! Real-time bar synthesis from the last known quote per instrument

use super::{Quote, QuoteSource};
use crate::bar::{Bar, Bars, Frequency};
use crate::telemetry::{record_latency, set_gauge, GaugeMetric, LatencyMetric};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Default)]
struct QuoteBoard {
    quotes: BTreeMap<String, Quote>,
    /// Exchange timestamp of the most recently ingested quote
    last_quote_at: Option<DateTime<Utc>>,
    /// Wall-clock time the most recent quote arrived
    last_observed_at: Option<DateTime<Utc>>,
}

/// Sole writer of the quote board
pub struct QuoteIngestor {
    board: watch::Sender<QuoteBoard>,
}

impl QuoteIngestor {
    pub fn ingest(&self, quote: Quote) {
        self.ingest_at(quote, Utc::now());
    }

    /// Record `quote` as observed at `observed_at`
    pub fn ingest_at(&self, quote: Quote, observed_at: DateTime<Utc>) {
        self.board.send_modify(|board| {
            board.last_quote_at = Some(quote.exchange_timestamp);
            board.last_observed_at = Some(observed_at);
            board.quotes.insert(quote.instrument.clone(), quote);
        });
    }

    /// Drain `quotes` until the channel closes
    pub async fn run(self, mut quotes: mpsc::Receiver<Quote>) {
        while let Some(quote) = quotes.recv().await {
            tracing::trace!(instrument = %quote.instrument, price = %quote.price, "Quote");
            self.ingest(quote);
        }
        tracing::warn!("Quote channel closed, ingestion stopped");
    }
}

/// Bar source for live trading
///
/// Each call to [`LiveFeed::next_bars`] snapshots the board, so synthesis
/// never holds up ingestion.
pub struct LiveFeed {
    board: watch::Receiver<QuoteBoard>,
    frequency: Frequency,
    last_bar_quote_at: Option<DateTime<Utc>>,
}

impl LiveFeed {
    /// Create a feed and the ingestor that writes to it
    pub fn new(frequency: Frequency) -> (Self, QuoteIngestor) {
        let (tx, rx) = watch::channel(QuoteBoard::default());
        let feed = Self {
            board: rx,
            frequency,
            last_bar_quote_at: None,
        };
        (feed, QuoteIngestor { board: tx })
    }

    /// Subscribe to `source` and ingest its quotes on a background task
    pub async fn connect<S: QuoteSource + ?Sized>(
        source: &S,
        frequency: Frequency,
    ) -> anyhow::Result<Self> {
        let quotes = source.subscribe().await?;
        let (feed, ingestor) = Self::new(frequency);
        tokio::spawn(ingestor.run(quotes));
        Ok(feed)
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Synthesize one bar per instrument if a new quote arrived since the last call
    ///
    /// Bars are degenerate (OHLC = last price) and stamped with `now`
    /// truncated to the second.
    pub fn next_bars(&mut self, now: DateTime<Utc>) -> Option<Bars> {
        let started = Instant::now();
        let board = self.board.borrow().clone();

        let latest = board.last_quote_at?;
        if self.last_bar_quote_at == Some(latest) {
            return None;
        }

        let stamp = now
            .duration_trunc(Duration::seconds(1))
            .unwrap_or(now);
        let bars = board.quotes.values().map(|quote| {
            Bar::from_price(
                quote.instrument.clone(),
                stamp,
                quote.price,
                quote.volume,
                quote.open_interest,
                self.frequency,
            )
        });

        let bars = match Bars::new(bars) {
            Ok(bars) => bars,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to synthesize bars");
                return None;
            }
        };
        self.last_bar_quote_at = Some(latest);
        record_latency(LatencyMetric::BarSynthesis, started.elapsed());

        Some(bars)
    }

    /// Last known quote for `instrument`
    pub fn quote(&self, instrument: &str) -> Option<Quote> {
        self.board.borrow().quotes.get(instrument).cloned()
    }

    /// Wall-clock time of the most recently observed quote
    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.board.borrow().last_observed_at
    }

    pub fn is_data_feed_alive(&self, threshold_secs: u64) -> bool {
        self.is_data_feed_alive_at(Utc::now(), threshold_secs)
    }

    /// Whether a quote was observed within `threshold_secs` of `now`
    ///
    /// A feed that never produced a quote is not alive.
    pub fn is_data_feed_alive_at(&self, now: DateTime<Utc>, threshold_secs: u64) -> bool {
        let Some(observed) = self.last_observed_at() else {
            return false;
        };
        let staleness = now - observed;
        set_gauge(
            GaugeMetric::FeedStaleness,
            staleness.num_milliseconds() as f64 / 1000.0,
        );
        staleness <= Duration::seconds(threshold_secs as i64)
    }
}
