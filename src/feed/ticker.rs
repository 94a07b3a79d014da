//! Kite ticker binary codec and WebSocket quote source
//!
//! A binary frame starts with a big-endian `u16` packet count; each packet is
//! preceded by its own `u16` length. Packet length identifies the mode:
//!
//! | length | mode                  |
//! |--------|-----------------------|
//! | 8      | ltp                   |
//! | 28     | index quote           |
//! | 32     | index full            |
//! | 44     | quote                 |
//! | 184    | full (with depth)     |
//!
//! All fields are big-endian `i32`; prices are integers scaled by a
//! segment-specific divisor. Frames shorter than two bytes are heartbeats.

use super::{Quote, QuoteSource};
use crate::venue::InstrumentTable;
use crate::ws::{WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

const LTP_PACKET: usize = 8;
const INDEX_QUOTE_PACKET: usize = 28;
const INDEX_FULL_PACKET: usize = 32;
const QUOTE_PACKET: usize = 44;
const FULL_PACKET: usize = 184;

const SEGMENT_CDS: u32 = 3;
const SEGMENT_BCD: u32 = 6;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickerError {
    #[error("frame truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported packet length {0}")]
    UnsupportedPacket(usize),
}

/// One decoded ticker packet
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub token: u32,
    pub last_price: Decimal,
    pub volume: Option<Decimal>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub exchange_timestamp: Option<DateTime<Utc>>,
}

fn read_u16(data: &[u8], at: usize) -> Result<usize, TickerError> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or(TickerError::Truncated {
            needed: at + 2,
            available: data.len(),
        })
}

/// Caller guarantees `packet` is long enough
fn read_i32(packet: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]])
}

fn divisor(token: u32) -> Decimal {
    match token & 0xff {
        SEGMENT_CDS => Decimal::new(10_000_000, 0),
        SEGMENT_BCD => Decimal::new(10_000, 0),
        _ => Decimal::new(100, 0),
    }
}

fn timestamp(secs: i32) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(i64::from(secs), 0).single()
}

fn decode_packet(packet: &[u8]) -> Result<Tick, TickerError> {
    let len = packet.len();
    if !matches!(
        len,
        LTP_PACKET | INDEX_QUOTE_PACKET | INDEX_FULL_PACKET | QUOTE_PACKET | FULL_PACKET
    ) {
        return Err(TickerError::UnsupportedPacket(len));
    }

    let token = read_i32(packet, 0) as u32;
    let scale = divisor(token);
    let price = |at: usize| Decimal::from(read_i32(packet, at)) / scale;

    let mut tick = Tick {
        token,
        last_price: price(4),
        volume: None,
        open: None,
        high: None,
        low: None,
        close: None,
        open_interest: None,
        exchange_timestamp: None,
    };

    match len {
        INDEX_QUOTE_PACKET | INDEX_FULL_PACKET => {
            tick.high = Some(price(8));
            tick.low = Some(price(12));
            tick.open = Some(price(16));
            tick.close = Some(price(20));
            if len == INDEX_FULL_PACKET {
                tick.exchange_timestamp = timestamp(read_i32(packet, 28));
            }
        }
        QUOTE_PACKET | FULL_PACKET => {
            tick.volume = Some(Decimal::from(read_i32(packet, 16)));
            tick.open = Some(price(28));
            tick.high = Some(price(32));
            tick.low = Some(price(36));
            tick.close = Some(price(40));
            if len == FULL_PACKET {
                tick.open_interest = Some(Decimal::from(read_i32(packet, 48)));
                tick.exchange_timestamp = timestamp(read_i32(packet, 60));
            }
        }
        _ => {}
    }

    Ok(tick)
}

/// Decode every packet in a binary frame
pub fn decode_frame(data: &[u8]) -> Result<Vec<Tick>, TickerError> {
    if data.len() < 2 {
        return Ok(Vec::new());
    }

    let count = read_u16(data, 0)?;
    let mut ticks = Vec::with_capacity(count);
    let mut offset = 2;

    for _ in 0..count {
        let len = read_u16(data, offset)?;
        offset += 2;
        let packet = data.get(offset..offset + len).ok_or(TickerError::Truncated {
            needed: offset + len,
            available: data.len(),
        })?;
        ticks.push(decode_packet(packet)?);
        offset += len;
    }

    Ok(ticks)
}

/// Convert ticks to quotes, dropping tokens not in `symbols`
///
/// Packets without an exchange timestamp are stamped `received_at`.
pub fn to_quotes(
    ticks: Vec<Tick>,
    symbols: &HashMap<u32, String>,
    received_at: DateTime<Utc>,
) -> Vec<Quote> {
    ticks
        .into_iter()
        .filter_map(|tick| {
            let instrument = symbols.get(&tick.token)?.clone();
            Some(Quote {
                instrument,
                price: tick.last_price,
                volume: tick.volume.unwrap_or_default(),
                open_interest: tick.open_interest.unwrap_or_default(),
                exchange_timestamp: tick.exchange_timestamp.unwrap_or(received_at),
            })
        })
        .collect()
}

/// Connection settings for the ticker stream
#[derive(Debug, Clone)]
pub struct TickerConfig {
    pub ws_url: String,
    pub api_key: String,
    pub access_token: String,
    /// Instrument token -> local symbol
    pub symbols: HashMap<u32, String>,
}

impl TickerConfig {
    pub fn from_venue(config: &crate::config::VenueConfig) -> Self {
        let table = InstrumentTable::new(config.instruments.iter().cloned());
        Self {
            ws_url: config.ws_url.clone(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
            symbols: table.token_map(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}?api_key={}&access_token={}",
            self.ws_url, self.api_key, self.access_token
        )
    }

    fn tokens(&self) -> Vec<u32> {
        let mut tokens: Vec<u32> = self.symbols.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    /// Subscribe and full-mode requests sent on every (re)connect
    pub fn subscription_messages(&self) -> Vec<String> {
        let tokens = self.tokens();
        vec![
            serde_json::json!({ "a": "subscribe", "v": tokens }).to_string(),
            serde_json::json!({ "a": "mode", "v": ["full", tokens] }).to_string(),
        ]
    }
}

/// Streaming quote source over the Kite ticker WebSocket
pub struct TickerSource {
    config: TickerConfig,
}

impl TickerSource {
    pub fn new(config: TickerConfig) -> Self {
        Self { config }
    }

    async fn run_message_loop(
        config: TickerConfig,
        mut ws_rx: mpsc::Receiver<WsMessage>,
        ws_tx: mpsc::Sender<String>,
        quote_tx: mpsc::Sender<Quote>,
    ) {
        while let Some(msg) = ws_rx.recv().await {
            match msg {
                WsMessage::Binary(data) => match decode_frame(&data) {
                    Ok(ticks) => {
                        for quote in to_quotes(ticks, &config.symbols, Utc::now()) {
                            if quote_tx.send(quote).await.is_err() {
                                tracing::debug!("Quote receiver dropped, stopping ticker");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, frame_len = data.len(), "Bad ticker frame");
                    }
                },
                WsMessage::Text(text) => {
                    tracing::debug!(
                        preview = %text.chars().take(200).collect::<String>(),
                        "Ticker text message"
                    );
                }
                WsMessage::Connected => {
                    tracing::info!(tokens = config.symbols.len(), "Ticker connected, subscribing");
                    for message in config.subscription_messages() {
                        if ws_tx.send(message).await.is_err() {
                            tracing::error!("Failed to send ticker subscription");
                            return;
                        }
                    }
                }
                WsMessage::Reconnecting { attempt } => {
                    tracing::warn!(attempt, "Ticker reconnecting");
                }
                WsMessage::Disconnected => {
                    tracing::warn!("Ticker disconnected");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl QuoteSource for TickerSource {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<Quote>> {
        if self.config.symbols.is_empty() {
            anyhow::bail!("no instrument tokens configured for the ticker");
        }

        let (quote_tx, quote_rx) = mpsc::channel(1024);
        let client = WsClient::new(WsConfig::new(self.config.url()));
        let (ws_rx, ws_tx) = client.connect();

        tokio::spawn(Self::run_message_loop(
            self.config.clone(),
            ws_rx,
            ws_tx,
            quote_tx,
        ));

        tracing::info!(url = %self.config.ws_url, "Subscribed to ticker");
        Ok(quote_rx)
    }
}
