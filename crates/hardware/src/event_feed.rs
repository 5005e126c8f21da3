//! WebSocket client for the hardware event feed.
//!
//! Keeps one connection open, decodes each text frame with
//! [`parse_feed_message`](crate::protocol::parse_feed_message) and forwards
//! the result into an mpsc channel. Reconnects with exponential backoff
//! until the receiving side is dropped.

use futures_util::StreamExt;
use rvm_config::LocalApiConfig;
use rvm_core::HardwareEvent;
use rvm_core::error::FeedError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::protocol::parse_feed_message;

/// What the feed tells its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Connected,
    Disconnected,
    Event(HardwareEvent),
}

enum StreamEnd {
    Closed,
    ConsumerGone,
}

pub struct EventFeed {
    url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

impl EventFeed {
    pub fn new(url: impl Into<String>, reconnect_initial: Duration, reconnect_max: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_initial,
            reconnect_max,
        }
    }

    pub fn from_config(config: &LocalApiConfig) -> Self {
        Self::new(
            config.ws_url.clone(),
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        )
    }

    /// Run the feed on its own task.
    pub fn spawn(self, tx: mpsc::Sender<FeedSignal>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    /// Connect, forward, reconnect. Returns once `tx` has no receiver.
    pub async fn run(self, tx: mpsc::Sender<FeedSignal>) {
        let mut backoff = self.reconnect_initial;

        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, "Event feed connected");
                    backoff = self.reconnect_initial;
                    if tx.send(FeedSignal::Connected).await.is_err() {
                        return;
                    }

                    match forward(stream, &tx).await {
                        Ok(StreamEnd::ConsumerGone) => return,
                        Ok(StreamEnd::Closed) => info!("Event feed closed by peer"),
                        Err(e) => warn!(error = %e, "Event feed dropped"),
                    }

                    if tx.send(FeedSignal::Disconnected).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let err = FeedError::ConnectFailed(e.to_string());
                    warn!(url = %self.url, error = %err, retry_in_ms = backoff.as_millis() as u64, "Event feed unavailable");
                }
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.reconnect_max);
        }
    }
}

async fn forward(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: &mpsc::Sender<FeedSignal>,
) -> Result<StreamEnd, FeedError> {
    let (_write, mut read) = stream.split();

    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => return Ok(StreamEnd::Closed),
            Ok(_) => continue,
            Err(e) => return Err(FeedError::ConnectionLost(e.to_string())),
        };

        match parse_feed_message(&text) {
            Ok(Some(event)) => {
                if tx.send(FeedSignal::Event(event)).await.is_err() {
                    return Ok(StreamEnd::ConsumerGone);
                }
            }
            Ok(None) => debug!(message = %text, "Unhandled feed message"),
            Err(e) => warn!(error = %e, "Discarding feed message"),
        }
    }

    Ok(StreamEnd::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_when_consumer_is_gone() {
        let feed = EventFeed::new(
            "ws://127.0.0.1:9/websocket",
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        // Connection fails, the closed channel is noticed, run returns.
        tokio::time::timeout(Duration::from_secs(5), feed.run(tx))
            .await
            .expect("feed should exit once the receiver is dropped");
    }

    #[test]
    fn from_config_uses_ws_url() {
        let config = LocalApiConfig::default();
        let feed = EventFeed::from_config(&config);
        assert_eq!(feed.url, config.ws_url);
        assert_eq!(feed.reconnect_initial, Duration::from_millis(1_000));
    }
}
