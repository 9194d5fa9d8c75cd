//! ConnectionManager behaviour under scripted transports and connectivity
//!
//! All tests run on paused Tokio time, so delays are exact and instant.

use kiosklink_connect::testing::{ManualConnectivity, MockBehavior, MockTransport};
use kiosklink_connect::{
    ConnectionIdentity, ConnectionManager, ConnectionState, FailureKind, InitialOutcome,
    InitialRetry, LinkIndicator, ManagerConfig, Recovery,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use MockBehavior::{Fail, HandshakeOnly, Reject, Succeed};

fn identity() -> ConnectionIdentity {
    ConnectionIdentity::new("store-1", "kiosk-7", "front", "org-42")
        .with_token(Some("token-a".to_string()))
}

fn setup(
    transport: MockTransport,
    reachable: bool,
) -> (ConnectionManager, Arc<MockTransport>, Arc<ManualConnectivity>) {
    let transport = Arc::new(transport);
    let network = Arc::new(ManualConnectivity::new(reachable));
    let manager =
        ConnectionManager::new(transport.clone(), network.clone(), ManagerConfig::default())
            .unwrap();
    (manager, transport, network)
}

/// Let every ready task run before continuing
async fn idle() {
    sleep(Duration::from_millis(1)).await;
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut reporter = manager.reporter();
    timeout(Duration::from_secs(1), reporter.wait_for(|d| d.state == state))
        .await
        .expect("state not reached in time")
        .expect("manager gone");
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_connects_after_six_seconds() {
    let (manager, transport, _) = setup(MockTransport::scripted(vec![Fail, Fail], Succeed), true);

    let start = Instant::now();
    let outcome = manager.connect(identity()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome, InitialOutcome::Connected { attempts: 3 });
    assert!(elapsed >= Duration::from_secs(6), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(7), "elapsed {:?}", elapsed);
    assert_eq!(transport.connect_calls(), 3);

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.state, ConnectionState::Connected);
    assert!(!diagnostics.initial_phase);
    assert_eq!(diagnostics.indicator, LinkIndicator::Online);
    assert_eq!(diagnostics.reconnect_cycles, 0);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_budget_and_no_delay_after_last_attempt() {
    let (manager, transport, _) = setup(MockTransport::new(Fail), true);

    let initial = InitialRetry {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
    };

    let start = Instant::now();
    let outcome = manager
        .connect_with_initial_retry(identity(), initial)
        .await
        .unwrap();

    // 1s after attempt 1, 2s after attempt 2, nothing after attempt 3
    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 3 });
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(transport.connect_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_throughout_never_calls_transport() {
    let (manager, transport, _) = setup(MockTransport::new(Succeed), false);

    let start = Instant::now();
    let outcome = manager.connect(identity()).await.unwrap();

    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 0 });
    assert_eq!(transport.connect_calls(), 0);
    // Four network waits of base_delay, none after the fifth iteration
    assert_eq!(start.elapsed(), Duration::from_secs(8));

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.state, ConnectionState::Disconnected);
    assert!(!diagnostics.network.reachable);
    assert_eq!(diagnostics.retry.attempt, 5);
    assert_eq!(
        diagnostics.last_error.map(|e| e.kind),
        Some(FailureKind::NoNetwork)
    );
    // Steady-state reconnection waits for the network instead of a timer
    assert!(!diagnostics.timer_pending);
}

#[tokio::test(start_paused = true)]
async fn test_network_returns_on_third_iteration_single_connect() {
    let (manager, transport, network) = setup(MockTransport::new(Succeed), false);

    let start = Instant::now();
    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(identity()).await }
    });

    sleep(Duration::from_secs(3)).await;
    network.set_reachable(true);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, InitialOutcome::Connected { attempts: 1 });
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_starts_exactly_one_steady_cycle() {
    let (manager, transport, _) = setup(MockTransport::new(Fail), true);

    let start = Instant::now();
    let outcome = manager.connect(identity()).await.unwrap();

    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 5 });
    assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 6 + 8));
    assert_eq!(transport.connect_calls(), 5);

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.state, ConnectionState::Disconnected);
    assert_eq!(diagnostics.recovery, Recovery::Cycle);
    assert!(diagnostics.timer_pending);
    assert_eq!(diagnostics.reconnect_cycles, 1);
    assert_eq!(diagnostics.indicator, LinkIndicator::Reconnecting);

    // A second trigger does not duplicate the cycle
    assert!(!manager.schedule_reconnect().await);
    assert_eq!(manager.diagnostics().reconnect_cycles, 1);

    // First steady delay is 10s ±10%
    sleep(Duration::from_millis(8_900)).await;
    assert_eq!(transport.connect_calls(), 5);
    sleep(Duration::from_millis(2_200)).await;
    assert_eq!(transport.connect_calls(), 6);

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.reconnect_cycles, 1);
    assert!(diagnostics.timer_pending, "failed cycle attempt re-arms the timer");
}

#[tokio::test(start_paused = true)]
async fn test_network_restored_during_initial_phase_adds_no_attempt() {
    let (manager, transport, network) = setup(MockTransport::new(Fail), true);

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(identity()).await }
    });

    sleep(Duration::from_millis(1_000)).await;
    network.set_reachable(false);
    sleep(Duration::from_millis(500)).await;
    network.set_reachable(true);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 5 });
    assert_eq!(transport.connect_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_network_restored_while_connected_is_ignored() {
    let (manager, transport, network) = setup(MockTransport::new(Succeed), true);

    manager.connect(identity()).await.unwrap();

    network.set_reachable(false);
    idle().await;
    network.set_reachable(true);
    idle().await;

    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.diagnostics().recovery, Recovery::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_then_dispose_ignores_late_callbacks() {
    let (manager, transport, _) = setup(MockTransport::new(Succeed), true);

    manager.connect(identity()).await.unwrap();
    transport.drop_session("wifi blip");
    wait_for_state(&manager, ConnectionState::Reconnecting).await;
    assert!(manager.diagnostics().timer_pending);

    manager.disconnect(false).await;
    manager.dispose().await;

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.state, ConnectionState::Disconnected);
    assert!(!diagnostics.timer_pending);
    assert_eq!(diagnostics.recovery, Recovery::Idle);
    assert_eq!(diagnostics.session, None);

    // Late callbacks from the session the manager no longer owns
    transport.restore_session();
    transport.drop_session("late");
    sleep(Duration::from_secs(120)).await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(transport.connect_calls(), 1);
    assert!(!manager.diagnostics().timer_pending);
}

#[tokio::test(start_paused = true)]
async fn test_transport_backup_restores_before_steady_timer() {
    let (manager, transport, _) = setup(MockTransport::new(Succeed), true);

    manager.connect(identity()).await.unwrap();
    transport.drop_session("wifi blip");
    wait_for_state(&manager, ConnectionState::Reconnecting).await;

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.recovery, Recovery::Cycle);
    assert!(diagnostics.timer_pending);
    assert_eq!(diagnostics.indicator, LinkIndicator::Reconnecting);

    // Backup layer reconnects within its 5s window
    sleep(Duration::from_secs(3)).await;
    transport.restore_session();
    wait_for_state(&manager, ConnectionState::Connected).await;

    let diagnostics = manager.diagnostics();
    assert!(!diagnostics.timer_pending);
    assert_eq!(diagnostics.recovery, Recovery::Idle);

    sleep(Duration::from_secs(70)).await;
    assert_eq!(transport.connect_calls(), 1, "steady layer never fired");
}

#[tokio::test(start_paused = true)]
async fn test_steady_timer_reconnects_after_drop() {
    let (manager, transport, _) = setup(MockTransport::new(Succeed), true);

    manager.connect(identity()).await.unwrap();
    transport.drop_session("backend restarted");
    wait_for_state(&manager, ConnectionState::Reconnecting).await;

    sleep(Duration::from_secs(12)).await;

    assert_eq!(transport.connect_calls(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.diagnostics().recovery, Recovery::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_network_lost_cancels_timer_and_restore_reconnects_immediately() {
    let (manager, transport, network) =
        setup(MockTransport::scripted(vec![Fail; 5], Succeed), true);

    let outcome = manager.connect(identity()).await.unwrap();
    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 5 });
    assert!(manager.diagnostics().timer_pending);

    network.set_reachable(false);
    idle().await;

    let diagnostics = manager.diagnostics();
    assert!(!diagnostics.timer_pending);
    assert_eq!(diagnostics.recovery, Recovery::Idle);
    assert_eq!(diagnostics.state, ConnectionState::Disconnected);

    network.set_reachable(true);
    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_eq!(transport.connect_calls(), 6);
    assert_eq!(manager.diagnostics().reconnect_cycles, 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_flap_during_attempt_restarts_backoff() {
    let (manager, transport, network) = setup(
        MockTransport::new(Fail).with_latency(Duration::from_secs(5)),
        true,
    );

    let initial = InitialRetry {
        max_attempts: 1,
        base_delay: Duration::from_secs(1),
    };
    let outcome = manager
        .connect_with_initial_retry(identity(), initial)
        .await
        .unwrap();
    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 1 });

    // First steady attempt fires within 9-11s and stays in flight for 5s
    sleep(Duration::from_millis(11_100)).await;
    assert_eq!(transport.connect_calls(), 2);
    assert!(!manager.diagnostics().timer_pending);

    network.set_reachable(false);
    idle().await;
    network.set_reachable(true);
    idle().await;

    sleep(Duration::from_secs(5)).await;
    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.retry.attempt, 0);
    assert!(diagnostics.timer_pending);

    // Back on the 10s tier, not the 20s one
    sleep(Duration::from_secs(12)).await;
    assert_eq!(transport.connect_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_without_auth_fails_after_confirmation_window() {
    let (manager, transport, _) =
        setup(MockTransport::scripted(vec![HandshakeOnly], Succeed), true);

    let start = Instant::now();
    let outcome = manager.connect(identity()).await.unwrap();

    // 2s confirmation window, then the 2s delay after attempt 1
    assert_eq!(outcome, InitialOutcome::Connected { attempts: 2 });
    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert!(transport.close_calls() >= 1, "half-open session closed");
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_is_retried_and_classified() {
    let (manager, transport, _) = setup(
        MockTransport::new(Reject("expired token".to_string())),
        true,
    );

    let initial = InitialRetry {
        max_attempts: 2,
        base_delay: Duration::from_secs(1),
    };
    let outcome = manager
        .connect_with_initial_retry(identity(), initial)
        .await
        .unwrap();

    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 2 });
    assert_eq!(transport.connect_calls(), 2);

    let error = manager.diagnostics().last_error.unwrap();
    assert_eq!(error.kind, FailureKind::AuthRejected);
    assert!(error.message.contains("expired token"));
}

#[tokio::test(start_paused = true)]
async fn test_refreshed_token_used_on_next_attempt() {
    let (manager, transport, _) = setup(MockTransport::scripted(vec![Fail], Succeed), true);

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(identity()).await }
    });

    sleep(Duration::from_secs(1)).await;
    assert!(manager.refresh_token(Some("token-b".to_string())).await);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, InitialOutcome::Connected { attempts: 2 });

    let tokens: Vec<_> = transport
        .identities()
        .into_iter()
        .map(|i| i.auth_token)
        .collect();
    assert_eq!(
        tokens,
        vec![Some("token-a".to_string()), Some("token-b".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_auth_for_abandoned_session_is_ignored() {
    let (manager, transport, _) = setup(MockTransport::scripted(vec![HandshakeOnly], Fail), true);

    let initial = InitialRetry {
        max_attempts: 1,
        base_delay: Duration::from_secs(1),
    };
    let outcome = manager
        .connect_with_initial_retry(identity(), initial)
        .await
        .unwrap();
    assert_eq!(outcome, InitialOutcome::Degraded { attempts: 1 });

    let stale = transport.last_session();
    assert!(stale.is_some());
    assert_eq!(manager.diagnostics().session, None);

    transport.emit(kiosklink_connect::transport::TransportEventKind::Authenticated);
    idle().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_aborts_initial_phase() {
    let (manager, transport, _) = setup(MockTransport::new(Fail), true);

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(identity()).await }
    });

    sleep(Duration::from_secs(1)).await;
    manager.disconnect(false).await;
    manager.disconnect(false).await;

    assert_eq!(task.await.unwrap().unwrap(), InitialOutcome::Aborted);
    assert_eq!(transport.connect_calls(), 1);

    let diagnostics = manager.diagnostics();
    assert_eq!(diagnostics.recovery, Recovery::Idle);
    assert!(!diagnostics.timer_pending);
    assert!(!diagnostics.initial_phase);

    // No identity after an intentional disconnect: nothing to reconnect
    assert!(!manager.schedule_reconnect().await);
}

#[tokio::test(start_paused = true)]
async fn test_reporter_streams_transitions() {
    let (manager, _, _) = setup(MockTransport::new(Succeed), true);
    let mut reporter = manager.reporter();

    assert_eq!(reporter.snapshot().indicator, LinkIndicator::Offline);

    manager.connect(identity()).await.unwrap();
    let snapshot = timeout(
        Duration::from_secs(1),
        reporter.wait_for(|d| d.indicator == LinkIndicator::Online),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(serde_json::to_string(&snapshot).unwrap().contains("\"online\""));
}
