//! Read-only view of the connection subsystem
//!
//! The manager publishes a fresh [`Diagnostics`] snapshot on a watch channel
//! after every state change. [`DiagnosticsReporter`] hands out that feed to
//! UI and logging code; it has no way to influence the connection.

use crate::error::{ConnectError, FailureKind};
use crate::network::NetworkState;
use crate::state::{ConnectionState, Recovery};
use crate::transport::{SessionId, TransportMode};
use kiosklink_core_resilience::RetryContext;
use serde::Serialize;
use tokio::sync::watch;

/// Coarse indicator for the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkIndicator {
    Online,
    Reconnecting,
    Offline,
}

/// Counters of the active retry sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrySnapshot {
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl From<&RetryContext> for RetrySnapshot {
    fn from(ctx: &RetryContext) -> Self {
        Self {
            attempt: ctx.attempt(),
            max_attempts: ctx.max_attempts(),
            base_delay_ms: ctx.base_delay().as_millis() as u64,
        }
    }
}

/// Most recent failure, classified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ConnectError> for ErrorRecord {
    fn from(err: &ConnectError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Point-in-time snapshot of the connection subsystem
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub state: ConnectionState,
    pub network: NetworkState,
    pub retry: RetrySnapshot,
    pub initial_phase: bool,
    pub recovery: Recovery,
    pub timer_pending: bool,
    pub transport_mode: Option<TransportMode>,
    pub last_error: Option<ErrorRecord>,
    pub reconnect_cycles: u64,
    pub session: Option<SessionId>,
    pub indicator: LinkIndicator,
}

impl Diagnostics {
    /// Snapshot of a manager that has never connected
    pub fn initial(retry: &RetryContext) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            network: NetworkState::default(),
            retry: RetrySnapshot::from(retry),
            initial_phase: false,
            recovery: Recovery::Idle,
            timer_pending: false,
            transport_mode: None,
            last_error: None,
            reconnect_cycles: 0,
            session: None,
            indicator: LinkIndicator::Offline,
        }
    }

    /// Derive the UI indicator from link state and retry activity
    pub fn indicator_for(state: ConnectionState, recovery: Recovery) -> LinkIndicator {
        match (state, recovery) {
            (ConnectionState::Connected, _) => LinkIndicator::Online,
            (ConnectionState::Connecting | ConnectionState::Reconnecting, _) => {
                LinkIndicator::Reconnecting
            }
            (ConnectionState::Disconnected, Recovery::Idle) => LinkIndicator::Offline,
            (ConnectionState::Disconnected, _) => LinkIndicator::Reconnecting,
        }
    }
}

/// Subscription handle over the manager's diagnostics feed
#[derive(Debug, Clone)]
pub struct DiagnosticsReporter {
    rx: watch::Receiver<Diagnostics>,
}

impl DiagnosticsReporter {
    pub fn new(rx: watch::Receiver<Diagnostics>) -> Self {
        Self { rx }
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Diagnostics {
        self.rx.borrow().clone()
    }

    /// Independent receiver for UI code that wants to drive its own loop
    pub fn subscribe(&self) -> watch::Receiver<Diagnostics> {
        self.rx.clone()
    }

    /// Wait for the next published snapshot. `None` once the manager is gone.
    pub async fn changed(&mut self) -> Option<Diagnostics> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate` (checked against the
    /// current one first). `None` once the manager is gone.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&Diagnostics) -> bool,
    ) -> Option<Diagnostics> {
        let snapshot = self.rx.wait_for(|d| predicate(d)).await.ok()?;
        Some(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_indicator() {
        use ConnectionState::*;

        assert_eq!(Diagnostics::indicator_for(Connected, Recovery::Idle), LinkIndicator::Online);
        assert_eq!(
            Diagnostics::indicator_for(Reconnecting, Recovery::Idle),
            LinkIndicator::Reconnecting
        );
        assert_eq!(
            Diagnostics::indicator_for(Disconnected, Recovery::Cycle),
            LinkIndicator::Reconnecting
        );
        assert_eq!(
            Diagnostics::indicator_for(Disconnected, Recovery::Idle),
            LinkIndicator::Offline
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let ctx = RetryContext::new(5, Duration::from_secs(2));
        let mut diagnostics = Diagnostics::initial(&ctx);
        diagnostics.last_error = Some(ErrorRecord::from(&ConnectError::AuthRejected {
            reason: "expired".to_string(),
        }));

        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["retry"]["base_delay_ms"], 2000);
        assert_eq!(json["network"]["reachable"], true);
        assert_eq!(json["last_error"]["kind"], "auth_rejected");
        assert_eq!(json["indicator"], "offline");
    }

    #[tokio::test]
    async fn test_reporter_follows_feed() {
        let ctx = RetryContext::default();
        let (tx, rx) = watch::channel(Diagnostics::initial(&ctx));
        let mut reporter = DiagnosticsReporter::new(rx);

        tx.send_modify(|d| d.state = ConnectionState::Connecting);
        let next = reporter.changed().await.unwrap();
        assert_eq!(next.state, ConnectionState::Connecting);

        tx.send_modify(|d| d.state = ConnectionState::Connected);
        let connected = reporter
            .wait_for(|d| d.state == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(connected.state.is_connected());

        drop(tx);
        assert!(reporter.changed().await.is_none());
    }
}
