/*!
 * Kiosklink - kiosk display client
 *
 * Keeps a kiosk screen's live order feed connected to the backend over
 * unreliable Wi-Fi:
 * - Bounded start-up retry with linear delays, then unbounded steady-state reconnection
 * - Host reachability monitoring that parks and expedites reconnection
 * - WebSocket transport with long-polling fallback and a fast backup reconnection layer
 * - Read-only diagnostics feed for the UI and logs
 *
 * The connection subsystem lives in `kiosklink-connect`; this crate adds
 * configuration, logging and the command line.
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod runner;

// Re-export commonly used types
pub use config::{KioskConfig, LogLevel};
pub use error::{KioskError, Result};
pub use runner::{run, RunOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
