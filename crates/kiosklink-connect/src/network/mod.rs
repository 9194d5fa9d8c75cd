//! NetworkMonitor: host reachability, independent of the transport
//!
//! The monitor owns [`NetworkState`]. It seeds the state with one query on
//! start, then follows the [`ConnectivitySource`]'s change stream and pushes
//! a [`NetworkTransition`] to the manager whenever reachability flips.
//! Reachability is "at least one reported interface class is not the
//! `none` sentinel". Before the first query the state is reachable, so
//! platforms without a connectivity signal never block connecting.

pub mod probe;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use probe::SysinfoConnectivity;

/// Class of an active network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceClass {
    Wifi,
    Ethernet,
    Mobile,
    Vpn,
    Other,
    /// Explicit "no connectivity" sentinel
    #[serde(rename = "none")]
    Unavailable,
}

/// Reachability plus the raw interface classes behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub reachable: bool,
    pub interfaces: Vec<InterfaceClass>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            reachable: true,
            interfaces: Vec::new(),
        }
    }
}

/// Reachability flip reported to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    /// unreachable -> reachable
    Restored,
    /// reachable -> unreachable
    Lost,
}

/// Whether a set of interface classes means the host can reach anything
pub fn is_reachable(classes: &[InterfaceClass]) -> bool {
    classes.iter().any(|c| *c != InterfaceClass::Unavailable)
}

/// Host connectivity signal
#[async_trait]
pub trait ConnectivitySource: Send + Sync + 'static {
    /// Current active interface classes
    async fn check(&self) -> Vec<InterfaceClass>;

    /// Unbounded stream of connectivity changes, each carrying the full
    /// current set of interface classes
    fn changes(&self) -> BoxStream<'static, Vec<InterfaceClass>>;
}

struct Shared {
    state: watch::Sender<NetworkState>,
    transitions: mpsc::UnboundedSender<NetworkTransition>,
}

impl Shared {
    fn apply(&self, classes: Vec<InterfaceClass>) {
        let reachable = is_reachable(&classes);
        let mut transition = None;

        self.state.send_modify(|state| {
            if state.reachable != reachable {
                transition = Some(if reachable {
                    NetworkTransition::Restored
                } else {
                    NetworkTransition::Lost
                });
            }
            state.reachable = reachable;
            state.interfaces = classes;
        });

        match transition {
            Some(transition) => {
                info!(?transition, interfaces = ?self.state.borrow().interfaces, "Network reachability changed");
                let _ = self.transitions.send(transition);
            }
            None => debug!(reachable, "Connectivity changed, reachability unchanged"),
        }
    }
}

struct Watcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Observes host reachability
pub struct NetworkMonitor {
    source: Arc<dyn ConnectivitySource>,
    shared: Arc<Shared>,
    watcher: Mutex<Option<Watcher>>,
}

impl NetworkMonitor {
    /// Create a stopped monitor. Transitions are delivered on the returned
    /// receiver.
    pub fn new(
        source: Arc<dyn ConnectivitySource>,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkTransition>) {
        let (state, _) = watch::channel(NetworkState::default());
        let (transitions, rx) = mpsc::unbounded_channel();

        let monitor = Self {
            source,
            shared: Arc::new(Shared { state, transitions }),
            watcher: Mutex::new(None),
        };
        (monitor, rx)
    }

    /// Seed the state with one query and start following changes.
    /// No-op when already running.
    pub async fn start(&self) {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return;
        }

        let classes = self.source.check().await;
        self.shared.apply(classes);

        let cancel = CancellationToken::new();
        let mut changes = self.source.changes();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = changes.next() => match next {
                        Some(classes) => shared.apply(classes),
                        None => {
                            debug!("Connectivity change stream ended");
                            break;
                        }
                    },
                }
            }
        });

        debug!(reachable = self.is_reachable(), "Network monitor started");
        *watcher = Some(Watcher { cancel, task });
    }

    /// Stop following changes. The last known state is kept.
    pub async fn stop(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.cancel.cancel();
            watcher.task.abort();
            debug!("Network monitor stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.watcher.lock().await.is_some()
    }

    /// Current state
    pub fn state(&self) -> NetworkState {
        self.shared.state.borrow().clone()
    }

    pub fn is_reachable(&self) -> bool {
        self.shared.state.borrow().reachable
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.shared.state.subscribe()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.cancel.cancel();
            watcher.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualConnectivity;

    #[test]
    fn test_reachability_rule() {
        assert!(is_reachable(&[InterfaceClass::Wifi]));
        assert!(is_reachable(&[InterfaceClass::Unavailable, InterfaceClass::Vpn]));
        assert!(!is_reachable(&[InterfaceClass::Unavailable]));
        assert!(!is_reachable(&[]));
    }

    #[test]
    fn test_default_is_reachable() {
        assert!(NetworkState::default().reachable);
    }

    #[tokio::test]
    async fn test_start_seeds_state() {
        let source = Arc::new(ManualConnectivity::new(false));
        let (monitor, mut rx) = NetworkMonitor::new(source);

        monitor.start().await;
        assert!(!monitor.is_reachable());
        assert_eq!(rx.recv().await, Some(NetworkTransition::Lost));
        assert_eq!(monitor.state().interfaces, vec![InterfaceClass::Unavailable]);
    }

    #[tokio::test]
    async fn test_transitions_follow_changes() {
        let source = Arc::new(ManualConnectivity::new(true));
        let (monitor, mut rx) = NetworkMonitor::new(source.clone());

        monitor.start().await;
        assert!(monitor.is_reachable());

        source.set_reachable(false);
        assert_eq!(rx.recv().await, Some(NetworkTransition::Lost));

        source.set_reachable(true);
        assert_eq!(rx.recv().await, Some(NetworkTransition::Restored));
        assert!(monitor.is_reachable());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_halts_updates() {
        let source = Arc::new(ManualConnectivity::new(true));
        let (monitor, mut rx) = NetworkMonitor::new(source.clone());

        monitor.start().await;
        monitor.start().await;
        assert_eq!(source.check_calls(), 1);
        assert!(monitor.is_running().await);

        monitor.stop().await;
        assert!(!monitor.is_running().await);

        source.set_reachable(false);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(monitor.is_reachable(), "state frozen after stop");
    }
}
