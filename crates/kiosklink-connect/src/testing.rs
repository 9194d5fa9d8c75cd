//! Scripted fakes for exercising the ConnectionManager without a backend
//!
//! [`MockTransport`] plays back a queue of [`MockBehavior`]s, one per
//! `connect` call, and keeps the last session's [`EventSink`] so a test can
//! inject drops or late callbacks. [`ManualConnectivity`] is a connectivity
//! source the test flips by hand.

use crate::error::ConnectError;
use crate::identity::ConnectionIdentity;
use crate::network::{ConnectivitySource, InterfaceClass};
use crate::transport::{EventSink, SessionId, TransportAdapter, TransportEventKind, TransportMode};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

// A panicking test thread must not cascade into every later assertion
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What one `connect` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Handshake fails
    Fail,
    /// Handshake completes and the backend acknowledges authentication
    Succeed,
    /// Handshake completes, authentication never arrives
    HandshakeOnly,
    /// Handshake completes, authentication is rejected
    Reject(String),
}

/// Scripted [`TransportAdapter`]
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockBehavior>>,
    fallback: MockBehavior,
    latency: Duration,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    identities: Mutex<Vec<ConnectionIdentity>>,
    sink: Mutex<Option<EventSink>>,
}

impl MockTransport {
    /// Every connect call behaves like `fallback`
    pub fn new(fallback: MockBehavior) -> Self {
        Self::scripted(Vec::new(), fallback)
    }

    /// Play `script` in order, then `fallback` forever
    pub fn scripted(script: Vec<MockBehavior>, fallback: MockBehavior) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            connect_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            identities: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    /// Make every handshake take `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Identities passed to each connect call, in order
    pub fn identities(&self) -> Vec<ConnectionIdentity> {
        lock(&self.identities).clone()
    }

    /// Session of the most recent connect call
    pub fn last_session(&self) -> Option<SessionId> {
        lock(&self.sink).as_ref().map(|s| s.session())
    }

    /// Emit an event on the most recent session's sink, even after it was
    /// closed (simulates a late callback)
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.emit(kind),
            None => false,
        }
    }

    /// Simulate the backend dropping the most recent session
    pub fn drop_session(&self, reason: &str) -> bool {
        self.emit(TransportEventKind::Disconnected {
            reason: reason.to_string(),
        })
    }

    /// Simulate the transport's backup layer restoring the session
    pub fn restore_session(&self) -> bool {
        self.emit(TransportEventKind::Connected {
            mode: TransportMode::Duplex,
        }) && self.emit(TransportEventKind::Authenticated)
    }

    fn next_behavior(&self) -> MockBehavior {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
        events: EventSink,
    ) -> Result<TransportMode, ConnectError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.identities).push(identity.clone());
        *lock(&self.sink) = Some(events.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_behavior() {
            MockBehavior::Fail => Err(ConnectError::HandshakeFailed(
                "scripted failure".to_string(),
            )),
            MockBehavior::Succeed => {
                events.emit(TransportEventKind::Connected {
                    mode: TransportMode::Duplex,
                });
                events.emit(TransportEventKind::Authenticated);
                Ok(TransportMode::Duplex)
            }
            MockBehavior::HandshakeOnly => {
                events.emit(TransportEventKind::Connected {
                    mode: TransportMode::Duplex,
                });
                Ok(TransportMode::Duplex)
            }
            MockBehavior::Reject(reason) => {
                events.emit(TransportEventKind::Connected {
                    mode: TransportMode::Duplex,
                });
                events.emit(TransportEventKind::AuthRejected { reason });
                Ok(TransportMode::Duplex)
            }
        }
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connectivity source driven by the test
#[derive(Debug)]
pub struct ManualConnectivity {
    classes: watch::Sender<Vec<InterfaceClass>>,
    check_calls: AtomicUsize,
}

impl ManualConnectivity {
    /// Start reachable over Wi-Fi, or with the `none` sentinel
    pub fn new(reachable: bool) -> Self {
        let (classes, _) = watch::channel(Self::classes_for(reachable));
        Self {
            classes,
            check_calls: AtomicUsize::new(0),
        }
    }

    /// Report a new set of interface classes
    pub fn set(&self, classes: Vec<InterfaceClass>) {
        self.classes.send_replace(classes);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.set(Self::classes_for(reachable));
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    fn classes_for(reachable: bool) -> Vec<InterfaceClass> {
        if reachable {
            vec![InterfaceClass::Wifi]
        } else {
            vec![InterfaceClass::Unavailable]
        }
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    async fn check(&self) -> Vec<InterfaceClass> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.classes.borrow().clone()
    }

    fn changes(&self) -> BoxStream<'static, Vec<InterfaceClass>> {
        let rx = self.classes.subscribe();
        stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let classes = rx.borrow_and_update().clone();
            Some((classes, rx))
        })
        .boxed()
    }
}
