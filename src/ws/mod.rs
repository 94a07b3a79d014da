//! WebSocket client library
//!
//! A reconnecting WebSocket client with ping/pong keepalive and exponential
//! backoff, used by the streaming quote sources.

mod client;
mod types;

pub use client::WsClient;
pub use types::{WsConfig, WsError, WsMessage};
