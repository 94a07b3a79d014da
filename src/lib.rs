//! exec-core: order execution core for algorithmic trading
//!
//! This library provides the core components for:
//! - Order and position state machines driven by order events
//! - A live brokerage facade with a background reconciliation monitor
//! - Retry and escalation policy for stuck or rejected orders
//! - Real-time bar synthesis from a pushed quote stream
//! - A bar-driven backtesting broker sharing the same order model
//! - Venue adapters (Kite-style REST trading API and binary ticker)
//! - Structured logging and metrics

pub mod backtest;
pub mod bar;
pub mod broker;
pub mod config;
pub mod feed;
pub mod order;
pub mod position;
pub mod strategy;
pub mod telemetry;
pub mod venue;
pub mod ws;
