use crate::error::{ConfigError, ConnectionError};
use futures_util::{SinkExt, StreamExt};
use gln_core::RawFrame;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub probe_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Parses a notifier endpoint. Only WebSocket URLs are accepted.
pub fn validate_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }
    let url = Url::parse(trimmed).map_err(|err| ConfigError::InvalidEndpoint {
        endpoint: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ConfigError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidEndpoint {
            endpoint: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// Opens one logical streaming connection per call.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn open(
        &self,
        endpoint: &Url,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// A live connection yielding raw frames in arrival order.
///
/// `next_frame` must be cancel safe: the supervisor drops it whenever a stop
/// or sweep wins the race.
pub trait Connection: Send + 'static {
    fn next_frame(&mut self) -> impl Future<Output = Result<RawFrame, ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: TransportConfig,
}

impl WsConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn open(&self, endpoint: &Url) -> Result<WsConnection, ConnectionError> {
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(endpoint.as_str()),
        )
        .await;
        let (ws, _response) = match connect {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                return Err(ConnectionError::Connect {
                    endpoint: endpoint.to_string(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                return Err(ConnectionError::Connect {
                    endpoint: endpoint.to_string(),
                    message: format!(
                        "timed out after {}s",
                        self.config.connect_timeout.as_secs()
                    ),
                })
            }
        };
        debug!(event = "transport_open", endpoint = %endpoint);
        Ok(WsConnection::new(ws, endpoint.to_string(), self.config.probe_interval))
    }
}

pub struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    endpoint: String,
    probe: Interval,
    closed: bool,
}

impl WsConnection {
    fn new(
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        endpoint: String,
        probe_interval: Duration,
    ) -> Self {
        let mut probe = tokio::time::interval_at(Instant::now() + probe_interval, probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ws,
            endpoint,
            probe,
            closed: false,
        }
    }
}

impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Result<RawFrame, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Shutdown);
        }
        loop {
            tokio::select! {
                message = self.ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => return Ok(RawFrame::Text(text)),
                        Some(Ok(Message::Binary(bytes))) => return Ok(RawFrame::Binary(bytes)),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|frame| format!("{} {}", frame.code, frame.reason))
                                .unwrap_or_else(|| "close frame".to_string());
                            return Err(ConnectionError::Closed { reason });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(ConnectionError::receive(err)),
                        None => {
                            return Err(ConnectionError::Closed {
                                reason: "stream ended".to_string(),
                            })
                        }
                    }
                }
                _ = self.probe.tick() => {
                    if let Err(err) = self.ws.send(Message::Ping(Vec::new())).await {
                        warn!(event = "transport_probe_failed", endpoint = %self.endpoint, error = %err);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.ws.close(None).await {
            let err = ConnectionError::receive(err);
            if err.is_benign() {
                debug!(event = "transport_close", endpoint = %self.endpoint);
            } else {
                debug!(event = "transport_close_error", endpoint = %self.endpoint, error = %err);
            }
        }
    }
}
