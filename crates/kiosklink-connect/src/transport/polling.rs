//! Long-polling fallback for networks that refuse the WebSocket upgrade
//!
//! `POST {base}/handshake` carries the auth payload; a 200 with a session id
//! doubles as the auth acknowledgement. `GET {base}?sid=…` hangs until the
//! backend has messages (JSON array) or nothing to say (204). 404/410 mean
//! the backend forgot the session.

use super::wire::{ClientMessage, PollRejection, PollSession, ServerMessage};
use super::{wire, TransportConfig};
use crate::error::ConnectError;
use crate::identity::ConnectionIdentity;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Most grace added on top of the long-poll window before a poll counts as lost
const POLL_SLACK: Duration = Duration::from_secs(5);

/// An authenticated long-polling session
pub struct PollingLink {
    client: Client,
    base: Url,
    sid: String,
    poll_timeout: Duration,
    buffered: VecDeque<ServerMessage>,
}

impl PollingLink {
    /// Perform the polling handshake. Authentication is settled here:
    /// a rejected identity comes back as [`ConnectError::AuthRejected`].
    pub async fn open(
        endpoint: &Url,
        identity: &ConnectionIdentity,
        config: &TransportConfig,
    ) -> Result<Self, ConnectError> {
        let base = wire::polling_base(endpoint)?;

        let mut headers = HeaderMap::new();
        for (name, value) in identity.headers() {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                ConnectError::HandshakeFailed(format!("invalid {} header: {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let mut handshake = base.clone();
        handshake.set_path(&format!("{}/handshake", base.path()));

        debug!(url = %handshake, "Opening polling session");

        let response = client
            .post(handshake)
            .json(&ClientMessage::Auth(identity))
            .timeout(config.connect_timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let session: PollSession = response.json().await?;
                debug!(sid = %session.sid, "Polling session accepted");
                Ok(Self {
                    client,
                    base,
                    sid: session.sid,
                    poll_timeout: config.poll_timeout,
                    buffered: VecDeque::new(),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let rejection = response.json::<PollRejection>().await.unwrap_or_default();
                Err(ConnectError::AuthRejected {
                    reason: rejection.reason,
                })
            }
            status => Err(ConnectError::HandshakeFailed(format!(
                "polling handshake returned {}",
                status
            ))),
        }
    }

    /// How long one poll may stay unanswered. The grace never exceeds the
    /// window itself, so short windows detect a dead link quickly.
    fn poll_deadline(&self) -> Duration {
        self.poll_timeout + POLL_SLACK.min(self.poll_timeout)
    }

    /// Next server message. `Ok(None)` means the backend ended the session.
    pub async fn next(&mut self) -> Result<Option<ServerMessage>, ConnectError> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                return Ok(Some(message));
            }

            let deadline = self.poll_deadline();
            let result = self
                .client
                .get(self.base.clone())
                .query(&[("sid", self.sid.as_str())])
                .timeout(deadline)
                .send()
                .await;

            // A live backend answers every poll within its window, so a poll
            // that outlives it means the link is dead
            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    debug!(sid = %self.sid, deadline_ms = deadline.as_millis() as u64, "Long-poll unanswered");
                    return Err(ConnectError::Timeout(deadline));
                }
                Err(e) => return Err(e.into()),
            };

            match response.status() {
                StatusCode::OK => {
                    let batch: Vec<serde_json::Value> = response.json().await?;
                    for raw in batch {
                        match serde_json::from_value::<ServerMessage>(raw) {
                            // The next poll already proves liveness
                            Ok(ServerMessage::Ping) => {}
                            Ok(message) => self.buffered.push_back(message),
                            Err(e) => warn!(error = %e, "Ignoring malformed poll entry"),
                        }
                    }
                }
                StatusCode::NO_CONTENT => {}
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    debug!(sid = %self.sid, "Polling session expired");
                    return Ok(None);
                }
                status => {
                    return Err(ConnectError::Protocol(format!(
                        "poll returned {}",
                        status
                    )))
                }
            }
        }
    }

    /// Tell the backend the session is over. Best effort.
    pub async fn close(self) {
        let _ = self
            .client
            .delete(self.base.clone())
            .query(&[("sid", self.sid.as_str())])
            .timeout(POLL_SLACK)
            .send()
            .await;
    }
}
