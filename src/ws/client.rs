//! WebSocket client with automatic reconnection

use super::types::{WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// How a single connection ended
enum Ended {
    /// Consumer or producer went away; stop for good
    Shutdown,
    /// Server closed the connection cleanly
    Closed,
}

/// Reusable WebSocket client with automatic reconnection and ping/pong handling
pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WsConfig::new(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect in the background
    ///
    /// Returns the inbound event receiver and a sender for outbound text
    /// frames. Dropping either end stops the client.
    pub fn connect(&self) -> (mpsc::Receiver<WsMessage>, mpsc::Sender<String>) {
        let (msg_tx, msg_rx) = mpsc::channel(self.config.buffer_size);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = run_connection_loop(config, msg_tx, send_rx).await {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
        });

        (msg_rx, send_tx)
    }
}

async fn run_connection_loop(
    config: WsConfig,
    tx: mpsc::Sender<WsMessage>,
    mut send_rx: mpsc::Receiver<String>,
) -> Result<(), WsError> {
    let mut failures = 0;
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        let result = connect_and_stream(&config, &tx, &mut send_rx, || {
            failures = 0;
            reconnect_delay = config.initial_reconnect_delay;
        })
        .await;

        let error = match result {
            Ok(Ended::Shutdown) => break,
            Ok(Ended::Closed) => WsError::ConnectionFailed("closed by server".into()),
            Err(e) => e,
        };

        failures += 1;
        tracing::warn!(error = %error, attempt = failures, "WebSocket connection lost, reconnecting");

        if config.max_reconnect_attempts > 0 && failures >= config.max_reconnect_attempts {
            tracing::error!("Max reconnection attempts reached");
            let _ = tx.send(WsMessage::Disconnected).await;
            return Err(WsError::MaxReconnectsExceeded);
        }

        if tx.is_closed() {
            break;
        }
        let _ = tx
            .send(WsMessage::Reconnecting { attempt: failures })
            .await;

        sleep(reconnect_delay).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
    }

    let _ = tx.send(WsMessage::Disconnected).await;
    Ok(())
}

async fn connect_and_stream(
    config: &WsConfig,
    tx: &mpsc::Sender<WsMessage>,
    send_rx: &mut mpsc::Receiver<String>,
    on_connected: impl FnOnce(),
) -> Result<Ended, WsError> {
    tracing::info!(url = %config.redacted_url(), "Connecting to WebSocket");

    let (ws_stream, _response) = connect_async(config.url.as_str())
        .await
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    tracing::info!("WebSocket connected");
    on_connected();
    if tx.send(WsMessage::Connected).await.is_err() {
        return Ok(Ended::Shutdown);
    }

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset();

    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                let forwarded = match msg {
                    Some(Ok(Message::Text(text))) => Some(WsMessage::Text(text)),
                    Some(Ok(Message::Binary(data))) => Some(WsMessage::Binary(data)),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        None
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        None
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Received close frame");
                        return Ok(Ended::Closed);
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => return Err(WsError::ConnectionFailed(e.to_string())),
                    None => return Err(WsError::ConnectionFailed("stream ended".into())),
                };

                if let Some(event) = forwarded {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("Receiver dropped, closing connection");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Ended::Shutdown);
                    }
                }
            }

            outbound = send_rx.recv() => {
                match outbound {
                    Some(text) => {
                        write.send(Message::Text(text)).await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Ended::Shutdown);
                    }
                }
            }

            _ = ping_interval.tick() => {
                if pong_deadline.is_none() {
                    write.send(Message::Ping(Vec::new())).await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    pong_deadline = Some(Instant::now() + config.pong_timeout);
                }
            }

            _ = async {
                match pong_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                return Err(WsError::PongTimeout(config.pong_timeout));
            }
        }
    }
}
