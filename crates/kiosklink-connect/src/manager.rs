//! ConnectionManager: lifecycle owner of the display's backend connection
//!
//! All mutable state lives in one `Core` behind a single async mutex. The
//! entry points that can touch it are:
//!
//! - caller operations (`connect_with_initial_retry`, `schedule_reconnect`,
//!   `disconnect`, `dispose`, `refresh_token`)
//! - the event pump, which serializes transport events and network
//!   transitions
//! - retry timer firings
//!
//! Each entry point re-checks the current state under the lock before acting,
//! so concurrent triggers collapse instead of stacking up. Transport events
//! carry the [`SessionId`] of the attempt that produced them; anything for a
//! session the manager no longer owns is dropped.

use crate::diagnostics::{Diagnostics, DiagnosticsReporter, ErrorRecord, RetrySnapshot};
use crate::error::{ConnectError, FailureKind};
use crate::identity::ConnectionIdentity;
use crate::network::{ConnectivitySource, NetworkMonitor, NetworkState, NetworkTransition};
use crate::state::{ConnectionState, LinkSignal, Recovery};
use crate::transport::{
    EventSink, SessionId, TransportAdapter, TransportConfig, TransportEvent, TransportEventKind,
    TransportMode,
};
use kiosklink_core_resilience::{BackoffPolicy, RetryContext, RetryTimer, TimerTicket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parameters of the bounded start-up phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialRetry {
    /// Connection attempts before handing off to steady-state reconnection
    pub max_attempts: u32,

    /// Delay unit: the wait after attempt `k` is `base_delay × k`
    pub base_delay: Duration,
}

impl Default for InitialRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl InitialRetry {
    pub fn validate(&self) -> Result<(), ConnectError> {
        RetryContext::new(self.max_attempts, self.base_delay)
            .validate()
            .map_err(|e| ConnectError::InvalidConfig(e.to_string()))
    }
}

/// ConnectionManager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Defaults for [`ConnectionManager::connect`]
    pub initial: InitialRetry,

    /// How long a completed handshake may wait for the auth acknowledgement
    pub confirm_window: Duration,

    /// Delay curve of the unbounded steady-state scheduler
    pub steady: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial: InitialRetry::default(),
            confirm_window: Duration::from_secs(2),
            steady: BackoffPolicy::exponential(
                Duration::from_secs(10),
                2.0,
                Duration::from_secs(60),
            )
            .with_jitter(0.1),
        }
    }
}

impl ManagerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConnectError> {
        self.initial.validate()?;

        if self.confirm_window.is_zero() {
            return Err(ConnectError::InvalidConfig(
                "confirm_window must be greater than 0".to_string(),
            ));
        }

        self.steady
            .validate()
            .map_err(|e| ConnectError::InvalidConfig(e.to_string()))
    }

    /// The transport's backup layer must give up before the steady-state
    /// scheduler's first delay can elapse, or the two layers fight.
    pub fn check_layering(&self, transport: &TransportConfig) -> Result<(), ConnectError> {
        let backup_cap = transport
            .backup_backoff
            .ceiling()
            .unwrap_or(Duration::MAX);
        let steady_floor = self.steady.jittered_floor();

        if backup_cap >= steady_floor {
            return Err(ConnectError::InvalidConfig(format!(
                "transport backup cap {:?} must be below the first steady-state delay {:?}",
                backup_cap, steady_floor
            )));
        }
        Ok(())
    }
}

/// How the bounded start-up phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialOutcome {
    /// Authenticated session established
    Connected { attempts: u32 },

    /// Budget exhausted; steady-state reconnection has taken over
    Degraded { attempts: u32 },

    /// Cancelled by `disconnect`, `dispose` or a newer connect call
    Aborted,
}

impl InitialOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, InitialOutcome::Connected { .. })
    }
}

enum AttemptOutcome {
    Connected,
    Failed,
    Aborted,
}

struct Core {
    state: ConnectionState,
    recovery: Recovery,
    retry: RetryContext,
    timer: RetryTimer,
    identity: Option<ConnectionIdentity>,
    session: Option<SessionId>,
    transport_mode: Option<TransportMode>,
    last_error: Option<ErrorRecord>,
    reconnect_cycles: u64,
    /// Cancels the suspension points of the current connect sequence
    cancel: CancellationToken,
    disposed: bool,
}

impl Core {
    fn apply(&mut self, signal: LinkSignal) {
        let next = self.state.on(signal);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?signal, "Connection state transition");
            self.state = next;
        }
    }

    fn renew_cancel(&mut self) -> CancellationToken {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }
}

struct Inner {
    transport: Arc<dyn TransportAdapter>,
    monitor: NetworkMonitor,
    config: ManagerConfig,
    core: Mutex<Core>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Last session whose authentication outcome is known
    settled: watch::Sender<Option<SessionId>>,
    diagnostics: watch::Sender<Diagnostics>,
    sessions: AtomicU64,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owns the connection lifecycle.
///
/// Cheap to clone; all clones drive the same connection. Must be created
/// inside a Tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use kiosklink_connect::{
///     ConnectionIdentity, ConnectionManager, ManagerConfig, SocketTransport,
///     SysinfoConnectivity, TransportConfig,
/// };
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), kiosklink_connect::ConnectError> {
/// let transport = Arc::new(SocketTransport::new(TransportConfig::default())?);
/// let probe = Arc::new(SysinfoConnectivity::default());
/// let manager = ConnectionManager::new(transport, probe, ManagerConfig::default())?;
///
/// let identity = ConnectionIdentity::new("store-1", "kiosk-7", "front", "org-42");
/// let outcome = manager.connect(identity).await?;
/// println!("{:?}: {:?}", outcome, manager.diagnostics().state);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until `connect_with_initial_retry`.
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        connectivity: Arc<dyn ConnectivitySource>,
        config: ManagerConfig,
    ) -> Result<Self, ConnectError> {
        config.validate()?;

        let (monitor, transitions) = NetworkMonitor::new(connectivity);
        let network = monitor.subscribe();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (settled, _) = watch::channel(None);

        let retry = RetryContext::new(config.initial.max_attempts, config.initial.base_delay);
        let (diagnostics, _) = watch::channel(Diagnostics::initial(&retry));

        let inner = Arc::new(Inner {
            transport,
            monitor,
            config,
            core: Mutex::new(Core {
                state: ConnectionState::Disconnected,
                recovery: Recovery::Idle,
                retry,
                timer: RetryTimer::new(),
                identity: None,
                session: None,
                transport_mode: None,
                last_error: None,
                reconnect_cycles: 0,
                cancel: CancellationToken::new(),
                disposed: false,
            }),
            events_tx,
            settled,
            diagnostics,
            sessions: AtomicU64::new(0),
            pump: std::sync::Mutex::new(None),
        });

        let pump = spawn_pump(Arc::downgrade(&inner), events_rx, transitions, network);
        if let Ok(mut slot) = inner.pump.lock() {
            *slot = Some(pump);
        }

        Ok(Self { inner })
    }

    /// [`connect_with_initial_retry`](Self::connect_with_initial_retry) with
    /// the configured start-up parameters
    pub async fn connect(
        &self,
        identity: ConnectionIdentity,
    ) -> Result<InitialOutcome, ConnectError> {
        let initial = self.inner.config.initial;
        self.connect_with_initial_retry(identity, initial).await
    }

    /// Start-up entry point.
    ///
    /// 1. Starts the network monitor (no-op if running)
    /// 2. Runs up to `max_attempts` iterations; an iteration without network
    ///    is skipped and waits `base_delay`, a failed attempt waits
    ///    `base_delay × attempt` (nothing after the last one)
    /// 3. On exhaustion hands off to steady-state reconnection
    ///
    /// Connection failures never surface as errors; the result says whether
    /// the phase ended connected or degraded. `Err` is reserved for a
    /// disposed manager or invalid parameters.
    pub async fn connect_with_initial_retry(
        &self,
        identity: ConnectionIdentity,
        initial: InitialRetry,
    ) -> Result<InitialOutcome, ConnectError> {
        initial.validate()?;
        let inner = &self.inner;

        let cancel = {
            let mut core = inner.core.lock().await;
            if core.disposed {
                return Err(ConnectError::Disposed);
            }

            core.identity = Some(identity);
            if core.state == ConnectionState::Connected {
                debug!("Already connected, identity updated for future attempts");
                inner.publish(&core);
                return Ok(InitialOutcome::Connected { attempts: 0 });
            }

            // The bounded phase supersedes any steady-state cycle
            core.timer.cancel();
            let cancel = core.renew_cancel();
            core.recovery = Recovery::InitialPhase;
            core.retry.begin_initial(initial.max_attempts, initial.base_delay);
            inner.publish(&core);
            cancel
        };

        inner.monitor.start().await;

        info!(
            max_attempts = initial.max_attempts,
            base_delay_ms = initial.base_delay.as_millis() as u64,
            "Starting initial connection phase"
        );

        let mut attempts = 0u32;
        for iteration in 1..=initial.max_attempts {
            if cancel.is_cancelled() {
                return Ok(InitialOutcome::Aborted);
            }

            let delay = if !inner.monitor.is_reachable() {
                info!(iteration, "No network, skipping connection attempt");
                {
                    let mut core = inner.core.lock().await;
                    if core.disposed || cancel.is_cancelled() {
                        return Ok(InitialOutcome::Aborted);
                    }
                    core.retry.record_attempt();
                    core.last_error =
                        Some(ErrorRecord::from(&ConnectError::NoNetwork));
                    inner.publish(&core);
                }
                (iteration < initial.max_attempts).then_some(initial.base_delay)
            } else {
                attempts += 1;
                match inner.attempt(&cancel).await {
                    AttemptOutcome::Connected => {
                        let mut core = inner.core.lock().await;
                        core.recovery = Recovery::Idle;
                        core.retry.reset();
                        inner.publish(&core);
                        info!(attempts, "Initial connection established");
                        return Ok(InitialOutcome::Connected { attempts });
                    }
                    AttemptOutcome::Aborted => return Ok(InitialOutcome::Aborted),
                    AttemptOutcome::Failed => {}
                }

                let core = inner.core.lock().await;
                core.retry.delay_before_next(&inner.config.steady)
            };

            if let Some(delay) = delay {
                debug!(iteration, delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(InitialOutcome::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let mut core = inner.core.lock().await;
        if core.disposed || cancel.is_cancelled() {
            return Ok(InitialOutcome::Aborted);
        }

        core.recovery = Recovery::Idle;
        if core.state == ConnectionState::Connected {
            core.retry.reset();
            inner.publish(&core);
            return Ok(InitialOutcome::Connected { attempts });
        }

        warn!(
            attempts,
            "Initial connection attempts exhausted, falling back to steady-state reconnection"
        );
        inner.schedule_reconnect_locked(&mut core);
        inner.publish(&core);

        Ok(InitialOutcome::Degraded { attempts })
    }

    /// Start a steady-state reconnection cycle.
    ///
    /// Returns `false` (and does nothing) when connected, when a cycle or the
    /// initial phase is already running, without a known identity, or while
    /// the network is down (network restore starts the cycle instead).
    pub async fn schedule_reconnect(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        let scheduled = self.inner.schedule_reconnect_locked(&mut core);
        self.inner.publish(&core);
        scheduled
    }

    /// Cancel pending retries, tear down the transport and go Disconnected.
    /// Idempotent.
    pub async fn disconnect(&self, stop_monitoring: bool) {
        self.inner.teardown(stop_monitoring, false).await;
    }

    /// Terminal teardown. Later calls return [`ConnectError::Disposed`];
    /// diagnostics stay readable.
    pub async fn dispose(&self) {
        self.inner.teardown(true, true).await;

        if let Ok(mut slot) = self.inner.pump.lock() {
            if let Some(pump) = slot.take() {
                pump.abort();
            }
        }
        info!("Connection manager disposed");
    }

    /// Replace the auth token used by every subsequent connect attempt.
    ///
    /// Returns `false` when there is no identity to update (never connected,
    /// or disconnected since).
    pub async fn refresh_token(&self, token: Option<String>) -> bool {
        let mut core = self.inner.core.lock().await;
        match core.identity.as_mut() {
            Some(identity) => {
                *identity = identity.with_token(token);
                debug!("Auth token refreshed");
                true
            }
            None => false,
        }
    }

    /// Current snapshot. Pure read.
    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.diagnostics.borrow().clone()
    }

    /// Read-only feed for UI and logging
    pub fn reporter(&self) -> DiagnosticsReporter {
        DiagnosticsReporter::new(self.inner.diagnostics.subscribe())
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.inner.diagnostics.borrow().state
    }

    /// Current host reachability
    pub fn network(&self) -> NetworkState {
        self.inner.monitor.state()
    }
}

impl Inner {
    fn publish(&self, core: &Core) {
        let snapshot = Diagnostics {
            state: core.state,
            network: self.monitor.state(),
            retry: RetrySnapshot::from(&core.retry),
            initial_phase: core.recovery == Recovery::InitialPhase,
            recovery: core.recovery,
            timer_pending: core.timer.is_pending(),
            transport_mode: core.transport_mode,
            last_error: core.last_error.clone(),
            reconnect_cycles: core.reconnect_cycles,
            session: core.session,
            indicator: Diagnostics::indicator_for(core.state, core.recovery),
        };
        self.diagnostics.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    /// One connect attempt with a fresh session, including the confirmation
    /// window. Success means the manager observed `Connected` for it.
    async fn attempt(&self, cancel: &CancellationToken) -> AttemptOutcome {
        let (identity, session, attempt, mut settled) = {
            let mut core = self.core.lock().await;
            if core.disposed || cancel.is_cancelled() {
                return AttemptOutcome::Aborted;
            }
            let Some(identity) = core.identity.clone() else {
                return AttemptOutcome::Aborted;
            };

            let session = SessionId(self.sessions.fetch_add(1, Ordering::Relaxed) + 1);
            let attempt = core.retry.record_attempt();
            core.session = Some(session);
            core.transport_mode = None;
            core.apply(LinkSignal::AttemptStarted);
            self.publish(&core);

            (identity, session, attempt, self.settled.subscribe())
        };

        info!(session = %session, attempt, "Connection attempt");

        let sink = EventSink::new(session, self.events_tx.clone());
        let result = tokio::select! {
            _ = cancel.cancelled() => return AttemptOutcome::Aborted,
            result = self.connect_and_confirm(&identity, sink, &mut settled) => result,
        };

        self.settle(session, attempt, result, cancel).await
    }

    async fn connect_and_confirm(
        &self,
        identity: &ConnectionIdentity,
        sink: EventSink,
        settled: &mut watch::Receiver<Option<SessionId>>,
    ) -> Result<(), ErrorRecord> {
        let session = sink.session();
        let mode = self
            .transport
            .connect(identity, sink)
            .await
            .map_err(|e| ErrorRecord::from(&e))?;

        debug!(session = %session, ?mode, "Handshake complete, awaiting authentication");

        // A handshake alone is not a connection: authentication may still fail
        let window = self.config.confirm_window;
        match tokio::time::timeout(window, settled.wait_for(|s| *s == Some(session))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ErrorRecord::new(
                FailureKind::TransportFailure,
                "manager shut down during confirmation",
            )),
            Err(_) => Err(ErrorRecord::from(&ConnectError::Timeout(window))),
        }
    }

    async fn settle(
        &self,
        session: SessionId,
        attempt: u32,
        result: Result<(), ErrorRecord>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let mut core = self.core.lock().await;
        if core.disposed || cancel.is_cancelled() || core.session != Some(session) {
            return AttemptOutcome::Aborted;
        }

        if core.state == ConnectionState::Connected {
            info!(session = %session, attempt, mode = ?core.transport_mode, "Connected");
            return AttemptOutcome::Connected;
        }

        let error = match result {
            Err(error) => error,
            Ok(()) => core.last_error.clone().unwrap_or_else(|| {
                ErrorRecord::new(
                    FailureKind::TransportFailure,
                    "session ended before authentication",
                )
            }),
        };
        warn!(
            session = %session,
            attempt,
            kind = ?error.kind,
            error = %error.message,
            "Connection attempt failed"
        );

        core.last_error = Some(error);
        core.apply(LinkSignal::AttemptFailed);
        core.session = None;
        core.transport_mode = None;
        self.publish(&core);
        drop(core);

        // Kill the half-open session so it cannot authenticate late
        self.transport.close().await;
        AttemptOutcome::Failed
    }

    fn schedule_reconnect_locked(self: &Arc<Self>, core: &mut Core) -> bool {
        if core.disposed || core.identity.is_none() {
            return false;
        }
        if core.state == ConnectionState::Connected {
            debug!("Connected, no reconnection needed");
            return false;
        }
        match core.recovery {
            Recovery::Idle => {}
            Recovery::Cycle => {
                debug!("Reconnection cycle already in flight");
                return false;
            }
            Recovery::InitialPhase => {
                debug!("Initial phase running, reconnection not scheduled");
                return false;
            }
        }
        if !self.monitor.is_reachable() {
            info!("Network unreachable, reconnection waits for network restore");
            return false;
        }

        core.recovery = Recovery::Cycle;
        core.reconnect_cycles += 1;
        core.retry.begin_steady();
        self.arm_timer(core);
        true
    }

    fn arm_timer(self: &Arc<Self>, core: &mut Core) {
        let delay = core
            .retry
            .delay_before_next(&self.config.steady)
            .unwrap_or_else(|| self.config.steady.floor());
        let weak = Arc::downgrade(self);

        core.timer.schedule(delay, move |ticket| async move {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(ticket).await;
            }
        });

        info!(
            attempt = core.retry.attempt() + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnection scheduled"
        );
    }

    async fn on_timer(self: Arc<Self>, ticket: TimerTicket) {
        let cancel = {
            let mut core = self.core.lock().await;
            if !core.timer.acknowledge(ticket) || core.disposed || core.recovery != Recovery::Cycle
            {
                return;
            }

            if core.state == ConnectionState::Connected {
                core.recovery = Recovery::Idle;
                core.retry.reset();
                self.publish(&core);
                return;
            }
            if !self.monitor.is_reachable() {
                info!("Network unreachable, reconnection parked");
                core.recovery = Recovery::Idle;
                self.publish(&core);
                return;
            }

            self.publish(&core);
            core.cancel.clone()
        };

        self.run_cycle_attempt(cancel).await;
    }

    /// One steady-state attempt; re-arms the timer on failure
    async fn run_cycle_attempt(self: Arc<Self>, cancel: CancellationToken) {
        let outcome = self.attempt(&cancel).await;

        let mut core = self.core.lock().await;
        if core.disposed || cancel.is_cancelled() || core.recovery != Recovery::Cycle {
            return;
        }

        match outcome {
            AttemptOutcome::Connected => {
                info!(cycles = core.reconnect_cycles, "Reconnected");
                core.recovery = Recovery::Idle;
                core.retry.reset();
            }
            AttemptOutcome::Failed if !self.monitor.is_reachable() => {
                info!("Network unreachable, reconnection parked");
                core.recovery = Recovery::Idle;
            }
            AttemptOutcome::Failed => self.arm_timer(&mut core),
            AttemptOutcome::Aborted => {}
        }
        self.publish(&core);
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        let mut core = self.core.lock().await;
        if core.disposed || core.session != Some(event.session) {
            debug!(session = %event.session, kind = ?event.kind, "Ignoring event for unowned session");
            return;
        }

        match event.kind {
            TransportEventKind::Connected { mode } => {
                core.transport_mode = Some(mode);
                core.apply(LinkSignal::Handshake);
            }
            TransportEventKind::Authenticated => {
                core.apply(LinkSignal::Authenticated);
                if core.state == ConnectionState::Connected {
                    core.last_error = None;
                    if core.recovery == Recovery::Cycle {
                        core.timer.cancel();
                        core.recovery = Recovery::Idle;
                        core.retry.reset();
                    }
                }
                self.settled.send_replace(Some(event.session));
            }
            TransportEventKind::AuthRejected { reason } => {
                warn!(session = %event.session, reason = %reason, "Backend rejected authentication");
                let was_live = core.state != ConnectionState::Connecting;
                core.last_error = Some(ErrorRecord::new(FailureKind::AuthRejected, reason));
                self.settled.send_replace(Some(event.session));

                if was_live {
                    core.apply(LinkSignal::Dropped);
                    self.schedule_reconnect_locked(&mut core);
                }
            }
            TransportEventKind::Disconnected { reason } => {
                let was = core.state;
                core.apply(LinkSignal::Dropped);
                core.last_error = Some(ErrorRecord::new(FailureKind::TransportFailure, reason));
                self.settled.send_replace(Some(event.session));

                if was == ConnectionState::Connected {
                    warn!(session = %event.session, "Connection lost");
                    self.schedule_reconnect_locked(&mut core);
                }
            }
            TransportEventKind::BackupAttempt { attempt } => {
                debug!(session = %event.session, attempt, "Transport backup reconnection");
            }
            TransportEventKind::BackupExhausted => {
                info!(session = %event.session, "Transport backup reconnection exhausted");
                if core.state == ConnectionState::Reconnecting {
                    self.schedule_reconnect_locked(&mut core);
                }
            }
        }

        self.publish(&core);
    }

    async fn on_network(self: &Arc<Self>, transition: NetworkTransition) {
        let mut core = self.core.lock().await;
        if core.disposed {
            return;
        }

        match transition {
            NetworkTransition::Lost => {
                // Waiting out a backoff with no network is pointless; the
                // transport decides whether the session itself is gone
                if core.recovery == Recovery::Cycle && core.timer.cancel() {
                    info!("Network lost, pending reconnection cancelled");
                    core.recovery = Recovery::Idle;
                }
            }
            NetworkTransition::Restored => {
                // Regaining the network starts the backoff over, even when an
                // attempt is already in flight
                if core.recovery == Recovery::Cycle {
                    core.retry.reset_attempts();
                }

                if core.state == ConnectionState::Connected
                    || core.recovery != Recovery::Idle
                    || core.identity.is_none()
                {
                    debug!(state = %core.state, recovery = core.recovery.as_str(), "Network restored, no action");
                    self.publish(&core);
                    return;
                }

                info!("Network restored, attempting to reconnect");
                core.recovery = Recovery::Cycle;
                core.reconnect_cycles += 1;
                core.retry.begin_steady();
                let cancel = core.cancel.clone();
                tokio::spawn(Arc::clone(self).run_cycle_attempt(cancel));
            }
        }

        self.publish(&core);
    }

    async fn teardown(&self, stop_monitoring: bool, dispose: bool) {
        {
            let mut core = self.core.lock().await;
            core.timer.cancel();
            core.renew_cancel();
            core.identity = None;
            core.session = None;
            core.transport_mode = None;
            core.recovery = Recovery::Idle;
            core.retry.reset();
            core.apply(LinkSignal::TornDown);
            if dispose {
                core.disposed = true;
            }
            self.publish(&core);
        }

        self.transport.close().await;
        if stop_monitoring {
            self.monitor.stop().await;
        }
        debug!(stop_monitoring, "Disconnected");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(pump) = slot.take() {
                pump.abort();
            }
        }
    }
}

/// Serializes transport events and network transitions into the manager
fn spawn_pump(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut transitions: mpsc::UnboundedReceiver<NetworkTransition>,
    mut network: watch::Receiver<NetworkState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_transport_event(event).await;
                }
                Some(transition) = transitions.recv() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_network(transition).await;
                }
                Ok(()) = network.changed() => {
                    let Some(inner) = inner.upgrade() else { break };
                    let core = inner.core.lock().await;
                    inner.publish(&core);
                }
                else => break,
            }
        }
        debug!("Connection manager event pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualConnectivity, MockBehavior, MockTransport};

    fn manager(transport: Arc<MockTransport>) -> ConnectionManager {
        let source = Arc::new(ManualConnectivity::new(true));
        ConnectionManager::new(transport, source, ManagerConfig::default()).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.check_layering(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_layering_rejects_slow_backup() {
        let transport = TransportConfig {
            backup_backoff: BackoffPolicy::exponential(
                Duration::from_secs(1),
                2.0,
                Duration::from_secs(10),
            ),
            ..Default::default()
        };
        assert!(ManagerConfig::default().check_layering(&transport).is_err());
    }

    #[test]
    fn test_invalid_initial_retry() {
        let initial = InitialRetry {
            max_attempts: 0,
            base_delay: Duration::from_secs(2),
        };
        assert!(initial.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let transport = Arc::new(MockTransport::new(MockBehavior::Succeed));
        let manager = manager(transport.clone());

        let identity = ConnectionIdentity::new("s", "d", "disp", "o");
        let outcome = manager.connect(identity).await.unwrap();

        assert_eq!(outcome, InitialOutcome::Connected { attempts: 1 });
        let diagnostics = manager.diagnostics();
        assert_eq!(diagnostics.state, ConnectionState::Connected);
        assert!(!diagnostics.initial_phase);
        assert_eq!(diagnostics.transport_mode, Some(TransportMode::Duplex));
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_reconnect_needs_identity() {
        let transport = Arc::new(MockTransport::new(MockBehavior::Fail));
        let manager = manager(transport);
        assert!(!manager.schedule_reconnect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_token_without_identity() {
        let transport = Arc::new(MockTransport::new(MockBehavior::Fail));
        let manager = manager(transport);
        assert!(!manager.refresh_token(Some("t".to_string())).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_manager_rejects_connect() {
        let transport = Arc::new(MockTransport::new(MockBehavior::Succeed));
        let manager = manager(transport);

        manager.dispose().await;
        let identity = ConnectionIdentity::new("s", "d", "disp", "o");
        assert!(matches!(
            manager.connect(identity).await,
            Err(ConnectError::Disposed)
        ));
        assert_eq!(manager.diagnostics().state, ConnectionState::Disconnected);
    }
}
