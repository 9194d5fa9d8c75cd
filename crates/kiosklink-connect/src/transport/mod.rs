//! TransportAdapter: the seam between the ConnectionManager and the wire
//!
//! An adapter opens sessions and reports what happens to them. It never
//! decides the link state: it emits [`TransportEvent`]s tagged with the
//! [`SessionId`] the manager handed it, and the manager translates them
//! into state transitions. Events for a session the manager no longer owns
//! are dropped on the manager side.
//!
//! [`SocketTransport`] is the production adapter: duplex WebSocket first,
//! HTTP long-polling when the WebSocket upgrade cannot be negotiated, plus
//! a short backup reconnection loop for sub-5-second blips.

pub mod duplex;
pub mod polling;
pub mod socket;
pub mod wire;

use crate::error::ConnectError;
use crate::identity::ConnectionIdentity;
use async_trait::async_trait;
use kiosklink_core_resilience::BackoffPolicy;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub use socket::SocketTransport;
pub use wire::InboundMessage;

/// Identifies one connect attempt's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Which wire mode a session ended up using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Full-duplex WebSocket
    Duplex,
    /// Half-duplex HTTP long-polling
    Polling,
}

/// What happened to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Transport-level handshake completed
    Connected { mode: TransportMode },
    /// Backend acknowledged the auth payload
    Authenticated,
    /// Backend rejected the auth payload; the session is closed
    AuthRejected { reason: String },
    /// Session dropped; the adapter's backup reconnection may follow
    Disconnected { reason: String },
    /// Backup reconnection attempt `attempt` is starting
    BackupAttempt { attempt: u32 },
    /// Backup reconnection gave up; the session is gone for good
    BackupExhausted,
}

/// A transport event tagged with its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub kind: TransportEventKind,
}

/// Where an adapter reports events for one session
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session, tx }
    }

    /// Session these events belong to
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report an event. Returns `false` once nobody is listening.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                session: self.session,
                kind,
            })
            .is_ok()
    }
}

/// Wraps the bidirectional streaming transport
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Open a brand-new session for `identity`.
    ///
    /// Any previous session is torn down first; a prior session is never
    /// resumed. Resolves once the transport-level handshake completes and
    /// the auth payload has been sent. Authentication acknowledgement (or
    /// rejection) arrives later through `events`.
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
        events: EventSink,
    ) -> Result<TransportMode, ConnectError>;

    /// Tear down the current session, including its backup reconnection.
    /// Idempotent.
    async fn close(&self);
}

/// Transport tuning
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint of the duplex transport (`ws://` or `wss://`)
    pub endpoint: String,

    /// Upper bound for one handshake (either mode)
    pub connect_timeout: Duration,

    /// Backup reconnection attempts after a drop
    pub backup_attempts: u32,

    /// Delay curve of the backup reconnection
    pub backup_backoff: BackoffPolicy,

    /// Fall back to long-polling when the WebSocket upgrade fails
    pub polling_fallback: bool,

    /// How long one long-poll request may hang
    pub poll_timeout: Duration,

    /// Ping interval on duplex sessions
    pub heartbeat_interval: Duration,

    /// Silence after which a duplex session counts as dropped
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/display".to_string(),
            connect_timeout: Duration::from_secs(10),
            backup_attempts: 3,
            backup_backoff: BackoffPolicy::exponential(
                Duration::from_secs(1),
                2.0,
                Duration::from_secs(5),
            ),
            polling_fallback: true,
            poll_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(45),
        }
    }
}

impl TransportConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConnectError> {
        wire::parse_endpoint(&self.endpoint)?;

        if self.connect_timeout.is_zero() {
            return Err(ConnectError::InvalidConfig(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConnectError::InvalidConfig(
                "poll_timeout must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.idle_timeout {
            return Err(ConnectError::InvalidConfig(
                "heartbeat_interval must be shorter than idle_timeout".to_string(),
            ));
        }
        self.backup_backoff
            .validate()
            .map_err(|e| ConnectError::InvalidConfig(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backup_attempts, 3);
        assert_eq!(config.backup_backoff.ceiling(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let config = TransportConfig {
            endpoint: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConnectError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_rejects_heartbeat_longer_than_idle_timeout() {
        let config = TransportConfig {
            heartbeat_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_poll_timeout() {
        let config = TransportConfig {
            poll_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_sink_tags_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(SessionId(7), tx);

        assert!(sink.emit(TransportEventKind::Authenticated));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, SessionId(7));
        assert_eq!(event.kind, TransportEventKind::Authenticated);

        drop(rx);
        assert!(!sink.emit(TransportEventKind::BackupExhausted));
    }
}
