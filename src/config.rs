//! Configuration types for exec-core

use crate::bar::Frequency;
use crate::telemetry::LogFormat;
use crate::venue::InstrumentSpec;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Resubmissions / escalations allowed per order
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Minimum spacing between retries (seconds)
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Order book poll interval (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Bounded wait for one monitor batch per dispatch (milliseconds)
    #[serde(default = "default_dispatch_wait_ms")]
    pub dispatch_wait_ms: u64,

    /// Capacity of the monitor -> broker queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_retry_count() -> u32 {
    3
}
fn default_retry_interval_secs() -> u64 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_dispatch_wait_ms() -> u64 {
    100
}
fn default_queue_capacity() -> usize {
    256
}

impl MonitorConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dispatch_wait(&self) -> Duration {
        Duration::from_millis(self.dispatch_wait_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_interval_secs: default_retry_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_wait_ms: default_dispatch_wait_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Live feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Quotes older than this mark the feed as stale (seconds)
    #[serde(default = "default_liveness_threshold_secs")]
    pub liveness_threshold_secs: u64,

    #[serde(default)]
    pub frequency: Frequency,

    /// Scheduler tick for the live runner (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_liveness_threshold_secs() -> u64 {
    30
}
fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_secs: default_liveness_threshold_secs(),
            frequency: Frequency::default(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Brokerage venue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_product")]
    pub product: String,

    #[serde(default = "default_variety")]
    pub variety: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Offset of the venue's local timestamps from UTC (seconds)
    #[serde(default = "default_utc_offset_secs")]
    pub utc_offset_secs: i32,

    #[serde(default)]
    pub instruments: Vec<InstrumentSpec>,
}

fn default_base_url() -> String {
    "https://api.kite.trade".to_string()
}
fn default_ws_url() -> String {
    "wss://ws.kite.trade".to_string()
}
fn default_product() -> String {
    "MIS".to_string()
}
fn default_variety() -> String {
    "regular".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_utc_offset_secs() -> i32 {
    19_800 // IST
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            api_key: String::new(),
            access_token: String::new(),
            product: default_product(),
            variety: default_variety(),
            timeout_secs: default_timeout_secs(),
            utc_offset_secs: default_utc_offset_secs(),
            instruments: Vec::new(),
        }
    }
}

/// Backtest broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// Commission as a fraction of traded notional
    #[serde(default)]
    pub commission_pct: Decimal,

    /// Fill market orders at the bar close instead of the open
    #[serde(default)]
    pub fill_market_on_close: bool,

    /// Fraction of bar volume fillable per bar (None = unlimited)
    #[serde(default)]
    pub volume_limit: Option<Decimal>,
}

fn default_initial_cash() -> Decimal {
    Decimal::new(1_000_000, 0)
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            commission_pct: Decimal::ZERO,
            fill_market_on_close: false,
            volume_limit: None,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port (disabled when unset)
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
