//! Kiosklink Connect: connection stabilization for kiosk display clients
//!
//! Keeps a long-lived, authenticated streaming connection to the order
//! backend alive over unreliable Wi-Fi without duplicate reconnect attempts
//! or hammering the server.
//!
//! # Architecture
//!
//! - **ConnectionManager**: Owns the link state machine, runs the bounded
//!   start-up retry loop and the unbounded steady-state scheduler
//! - **NetworkMonitor**: Tracks host reachability and pushes transitions to the manager
//! - **TransportAdapter**: WebSocket transport with long-polling fallback and a
//!   fast backup reconnection layer (`SocketTransport`)
//! - **DiagnosticsReporter**: Read-only snapshot feed for UI and logs
//!
//! # Example
//!
//! ```rust,no_run
//! use kiosklink_connect::{
//!     ConnectionIdentity, ConnectionManager, ManagerConfig, SocketTransport,
//!     SysinfoConnectivity, TransportConfig,
//! };
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), kiosklink_connect::ConnectError> {
//!     let transport = Arc::new(SocketTransport::new(TransportConfig::default())?);
//!     let manager = ConnectionManager::new(
//!         transport.clone(),
//!         Arc::new(SysinfoConnectivity::default()),
//!         ManagerConfig::default(),
//!     )?;
//!
//!     let identity = ConnectionIdentity::new("store-1", "kiosk-7", "front", "org-42")
//!         .with_token(Some("token".to_string()));
//!     manager.connect(identity).await?;
//!
//!     let mut orders = transport.messages();
//!     while let Ok(message) = orders.recv().await {
//!         println!("{}: {}", message.name, message.payload);
//!     }
//!     Ok(())
//! }
//! ```

pub mod diagnostics;
pub mod error;
pub mod identity;
pub mod manager;
pub mod network;
pub mod state;
pub mod testing;
pub mod transport;

pub use diagnostics::{Diagnostics, DiagnosticsReporter, ErrorRecord, LinkIndicator};
pub use error::{ConnectError, FailureKind};
pub use identity::ConnectionIdentity;
pub use manager::{ConnectionManager, InitialOutcome, InitialRetry, ManagerConfig};
pub use network::{
    ConnectivitySource, InterfaceClass, NetworkMonitor, NetworkState, NetworkTransition,
    SysinfoConnectivity,
};
pub use state::{ConnectionState, Recovery};
pub use transport::{
    InboundMessage, SessionId, SocketTransport, TransportAdapter, TransportConfig, TransportMode,
};
