//! SocketTransport: the production [`TransportAdapter`]
//!
//! Every `connect` tears down whatever session existed and opens a brand-new
//! one: duplex first, long-polling when the upgrade cannot be negotiated.
//! A spawned session task then reads server messages and turns them into
//! [`TransportEventKind`]s. When a live session drops, the same task runs the
//! short backup reconnection (3 attempts, 1s growing to a 5s cap) before
//! reporting [`TransportEventKind::BackupExhausted`].

use super::duplex::DuplexLink;
use super::polling::PollingLink;
use super::wire::{self, InboundMessage, ServerMessage};
use super::{EventSink, SessionId, TransportAdapter, TransportConfig, TransportEventKind, TransportMode};
use crate::error::{ConnectError, FailureKind};
use crate::identity::ConnectionIdentity;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Buffered inbound events per subscriber before the slowest one lags
const MESSAGE_CAPACITY: usize = 1000;

/// How long teardown waits for a session to say goodbye
const CLOSE_GRACE: Duration = Duration::from_secs(2);

enum Link {
    Duplex(DuplexLink),
    Polling(PollingLink),
}

impl Link {
    fn mode(&self) -> TransportMode {
        match self {
            Link::Duplex(_) => TransportMode::Duplex,
            Link::Polling(_) => TransportMode::Polling,
        }
    }

    async fn next(&mut self) -> Result<Option<ServerMessage>, ConnectError> {
        match self {
            Link::Duplex(link) => link.next().await,
            Link::Polling(link) => link.next().await,
        }
    }

    async fn close(self) {
        let closing = async {
            match self {
                Link::Duplex(link) => link.close().await,
                Link::Polling(link) => link.close().await,
            }
        };
        let _ = tokio::time::timeout(CLOSE_GRACE, closing).await;
    }
}

struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything a session task needs, owned
struct SessionContext {
    endpoint: Url,
    identity: ConnectionIdentity,
    config: TransportConfig,
    events: EventSink,
    messages: broadcast::Sender<InboundMessage>,
    cancel: CancellationToken,
}

enum SessionEnd {
    Cancelled,
    Rejected,
    Dropped(String),
}

/// WebSocket transport with long-polling fallback and backup reconnection
pub struct SocketTransport {
    config: TransportConfig,
    endpoint: Url,
    messages: broadcast::Sender<InboundMessage>,
    active: Mutex<Option<ActiveSession>>,
}

impl SocketTransport {
    /// Create a transport for `config.endpoint`
    pub fn new(config: TransportConfig) -> Result<Self, ConnectError> {
        config.validate()?;
        let endpoint = wire::parse_endpoint(&config.endpoint)?;
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);

        Ok(Self {
            config,
            endpoint,
            messages,
            active: Mutex::new(None),
        })
    }

    /// Subscribe to backend `event` frames
    pub fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Session currently owned by this transport, if any
    pub async fn active_session(&self) -> Option<SessionId> {
        self.active.lock().await.as_ref().map(|a| a.id)
    }
}

#[async_trait]
impl TransportAdapter for SocketTransport {
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
        events: EventSink,
    ) -> Result<TransportMode, ConnectError> {
        // Never resume: a half-closed prior socket must not bleed state
        self.close().await;

        let session = events.session();
        let link = open_link(&self.endpoint, identity, &self.config).await?;
        let mode = link.mode();

        info!(session = %session, mode = ?mode, "Transport connected");
        events.emit(TransportEventKind::Connected { mode });

        let cancel = CancellationToken::new();
        let ctx = SessionContext {
            endpoint: self.endpoint.clone(),
            identity: identity.clone(),
            config: self.config.clone(),
            events,
            messages: self.messages.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_session(link, ctx));

        *self.active.lock().await = Some(ActiveSession {
            id: session,
            cancel,
            task,
        });

        Ok(mode)
    }

    async fn close(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            debug!(session = %active.id, "Closing transport session");
            active.cancel.cancel();
            if tokio::time::timeout(CLOSE_GRACE * 2, active.task).await.is_err() {
                warn!(session = %active.id, "Session task did not stop in time");
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

/// Duplex first, polling if the upgrade fails and fallback is enabled
async fn open_link(
    endpoint: &Url,
    identity: &ConnectionIdentity,
    config: &TransportConfig,
) -> Result<Link, ConnectError> {
    match DuplexLink::open(endpoint, identity, config).await {
        Ok(link) => Ok(Link::Duplex(link)),
        Err(e) if config.polling_fallback && e.kind() == FailureKind::TransportFailure => {
            warn!(error = %e, "WebSocket upgrade failed, falling back to long-polling");
            Ok(Link::Polling(PollingLink::open(endpoint, identity, config).await?))
        }
        Err(e) => Err(e),
    }
}

async fn run_session(mut link: Link, ctx: SessionContext) {
    loop {
        let end = pump(&mut link, &ctx).await;
        link.close().await;

        let reason = match end {
            SessionEnd::Dropped(reason) => reason,
            SessionEnd::Cancelled | SessionEnd::Rejected => return,
        };

        info!(session = %ctx.events.session(), reason = %reason, "Transport dropped");
        if !ctx.events.emit(TransportEventKind::Disconnected { reason }) {
            return;
        }

        match backup_reconnect(&ctx).await {
            Some(next) => link = next,
            None => return,
        }
    }
}

/// Read one link until it ends
async fn pump(link: &mut Link, ctx: &SessionContext) -> SessionEnd {
    // The polling handshake already settled authentication
    if matches!(link, Link::Polling(_)) {
        ctx.events.emit(TransportEventKind::Authenticated);
    }

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return SessionEnd::Cancelled,
            next = link.next() => next,
        };

        match next {
            Ok(Some(ServerMessage::AuthAck)) => {
                ctx.events.emit(TransportEventKind::Authenticated);
            }
            Ok(Some(ServerMessage::AuthError { reason })) => {
                warn!(session = %ctx.events.session(), reason = %reason, "Authentication rejected");
                ctx.events.emit(TransportEventKind::AuthRejected { reason });
                return SessionEnd::Rejected;
            }
            Ok(Some(ServerMessage::Event { name, payload })) => {
                // No subscribers is fine
                let _ = ctx.messages.send(InboundMessage { name, payload });
            }
            Ok(Some(ServerMessage::Ping)) => {}
            Ok(None) => return SessionEnd::Dropped("closed by backend".to_string()),
            Err(e) => return SessionEnd::Dropped(e.to_string()),
        }
    }
}

/// Fast-path recovery for short blips. Uses the identity of the session
/// that dropped; token rotation only applies to manager-driven attempts.
async fn backup_reconnect(ctx: &SessionContext) -> Option<Link> {
    for attempt in 1..=ctx.config.backup_attempts {
        let delay = ctx.config.backup_backoff.delay_for(attempt);

        tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        if !ctx.events.emit(TransportEventKind::BackupAttempt { attempt }) {
            return None;
        }
        debug!(session = %ctx.events.session(), attempt, delay_ms = delay.as_millis() as u64, "Backup reconnection attempt");

        let opened = tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            opened = open_link(&ctx.endpoint, &ctx.identity, &ctx.config) => opened,
        };

        match opened {
            Ok(link) => {
                ctx.events.emit(TransportEventKind::Connected { mode: link.mode() });
                return Some(link);
            }
            Err(ConnectError::AuthRejected { reason }) => {
                ctx.events.emit(TransportEventKind::AuthRejected { reason });
                return None;
            }
            Err(e) => debug!(attempt, error = %e, "Backup reconnection attempt failed"),
        }
    }

    ctx.events.emit(TransportEventKind::BackupExhausted);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_endpoint() {
        let config = TransportConfig {
            endpoint: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(SocketTransport::new(config).is_err());
    }

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let transport = SocketTransport::new(TransportConfig::default()).unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.active_session().await, None);
    }

    #[tokio::test]
    async fn test_messages_subscription() {
        let transport = SocketTransport::new(TransportConfig::default()).unwrap();
        let mut rx = transport.messages();

        transport
            .messages
            .send(InboundMessage {
                name: "order.ready".to_string(),
                payload: serde_json::json!({"id": 1}),
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().name, "order.ready");
    }
}
