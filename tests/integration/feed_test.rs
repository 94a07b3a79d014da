//! Quote ingestion and bar synthesis

use chrono::{Duration, TimeZone, Utc};
use exec_core::bar::Frequency;
use exec_core::feed::{ticker, LiveFeed, Quote};
use rust_decimal_macros::dec;
use std::collections::HashMap;

fn ltp_frame(token: u32, paise: i32) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.extend_from_slice(&8u16.to_be_bytes());
    frame.extend_from_slice(&token.to_be_bytes());
    frame.extend_from_slice(&paise.to_be_bytes());
    frame
}

#[test]
fn test_latest_tick_wins_within_one_synthesis() {
    let (mut feed, ingestor) = LiveFeed::new(Frequency::Realtime);
    let base = Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 10).unwrap();

    for (offset_ms, price) in [(200, dec!(101.5)), (400, dec!(101.75))] {
        let at = base + Duration::milliseconds(offset_ms);
        ingestor.ingest_at(
            Quote {
                instrument: "NSE:INFY".to_string(),
                price,
                volume: dec!(10),
                open_interest: dec!(0),
                exchange_timestamp: at,
            },
            at,
        );
    }

    let now = base + Duration::milliseconds(900);
    let bars = feed.next_bars(now).expect("new quotes produce bars");
    assert_eq!(bars.len(), 1);
    let bar = bars.get("NSE:INFY").unwrap();
    assert_eq!(bar.close(), dec!(101.75));
    assert_eq!(bar.open(), bar.close());
    assert_eq!(bar.date_time(), base);

    // No new quote since the last synthesis
    assert!(feed.next_bars(now + Duration::seconds(1)).is_none());
}

#[test]
fn test_decoded_frames_feed_bars() {
    let (mut feed, ingestor) = LiveFeed::new(Frequency::Realtime);
    let symbols = HashMap::from([(408065u32, "NSE:INFY".to_string())]);
    let received = Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap();

    let ticks = ticker::decode_frame(&ltp_frame(408065, 150_025)).unwrap();
    for quote in ticker::to_quotes(ticks, &symbols, received) {
        ingestor.ingest_at(quote, received);
    }

    let bars = feed.next_bars(received + Duration::seconds(1)).unwrap();
    assert_eq!(bars.get("NSE:INFY").unwrap().close(), dec!(1500.25));
    assert!(feed.is_data_feed_alive_at(received + Duration::seconds(5), 30));
    assert!(!feed.is_data_feed_alive_at(received + Duration::seconds(31), 30));
}

#[test]
fn test_unknown_tokens_are_dropped() {
    let ticks = ticker::decode_frame(&ltp_frame(1, 100)).unwrap();
    let quotes = ticker::to_quotes(ticks, &HashMap::new(), Utc::now());
    assert!(quotes.is_empty());
}
