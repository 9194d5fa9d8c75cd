//! Duplex transport: one WebSocket per session
//!
//! Single responsibility: upgrade, send the auth frame, and read server
//! messages while keeping the socket honest with pings. A socket that stays
//! silent past `idle_timeout` is reported as dropped: half-open TCP
//! connections are common on kiosk Wi-Fi and would otherwise never error.

use super::wire::{self, ClientMessage, ServerMessage};
use super::TransportConfig;
use crate::error::ConnectError;
use crate::identity::ConnectionIdentity;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// An upgraded WebSocket that has already sent its auth frame
pub struct DuplexLink {
    sink: WsSink,
    stream: WsStream,
    heartbeat: Interval,
    idle_timeout: Duration,
    last_seen: Instant,
}

impl DuplexLink {
    /// Upgrade to a WebSocket at `endpoint` and send the auth payload.
    pub async fn open(
        endpoint: &Url,
        identity: &ConnectionIdentity,
        config: &TransportConfig,
    ) -> Result<Self, ConnectError> {
        let mut request = endpoint.as_str().into_client_request()?;
        for (name, value) in identity.headers() {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                ConnectError::HandshakeFailed(format!("invalid {} header: {}", name, e))
            })?;
            request.headers_mut().insert(name, value);
        }

        debug!(endpoint = %endpoint, "Opening WebSocket");

        let (ws, response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectError::Timeout(config.connect_timeout))??;

        debug!(status = %response.status(), "WebSocket upgraded");

        let (sink, stream) = ws.split();

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut link = Self {
            sink,
            stream,
            heartbeat,
            idle_timeout: config.idle_timeout,
            last_seen: Instant::now(),
        };

        link.send(&ClientMessage::Auth(identity)).await?;
        Ok(link)
    }

    /// Send one client message as a text frame
    pub async fn send(&mut self, message: &ClientMessage<'_>) -> Result<(), ConnectError> {
        let frame = wire::encode(message)?;
        self.sink.send(Message::Text(frame)).await?;
        Ok(())
    }

    /// Next server message. `Ok(None)` means the backend closed the session.
    pub async fn next(&mut self) -> Result<Option<ServerMessage>, ConnectError> {
        loop {
            let idle_deadline = self.last_seen + self.idle_timeout;

            tokio::select! {
                frame = self.stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.last_seen = Instant::now();
                            match wire::decode(&text) {
                                Ok(ServerMessage::Ping) => self.send(&ClientMessage::Pong).await?,
                                Ok(message) => return Ok(Some(message)),
                                Err(e) => warn!(error = %e, "Ignoring malformed frame"),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Backend closed WebSocket");
                            return Ok(None);
                        }
                        // Ping/pong/binary frames only prove liveness
                        Some(Ok(_)) => self.last_seen = Instant::now(),
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(None),
                    }
                }
                _ = self.heartbeat.tick() => {
                    self.sink.send(Message::Ping(Vec::new())).await?;
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    return Err(ConnectError::Timeout(self.idle_timeout));
                }
            }
        }
    }

    /// Close the socket. Errors are irrelevant at this point.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
