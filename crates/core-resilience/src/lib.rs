//! Kiosklink Core Resilience: Pure-logic retry primitives
//!
//! # Overview
//!
//! Building blocks for the connection subsystem's two retry layers:
//!
//! - **BackoffPolicy**: Linear and capped-exponential delay curves with optional jitter
//! - **RetryContext**: Attempt counters scoped to one connect sequence
//! - **RetryTimer**: A single outstanding, cancelable retry timer
//!
//! # Key Principles
//!
//! This crate has zero knowledge of:
//! - Sockets, WebSockets or HTTP
//! - Connection state or authentication
//! - How the host reports connectivity
//!
//! # Architecture
//!
//! ```text
//!   connect attempt fails
//!            │
//!            ▼
//! ┌─────────────────────────────────────────┐
//! │       RetryContext                      │  ← Counts attempts, knows the phase
//! │  (initial: bounded, steady: unbounded)  │
//! └─────────────┬───────────────────────────┘
//!               │ delay_before_next()
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       BackoffPolicy                     │  ← Linear (initial) / exponential (steady)
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       RetryTimer                        │  ← At most one outstanding timer
//! │  (reschedule cancels the previous one)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```
//! use kiosklink_core_resilience::{BackoffPolicy, RetryContext};
//! use std::time::Duration;
//!
//! let steady = BackoffPolicy::exponential(Duration::from_secs(10), 2.0, Duration::from_secs(60));
//! let mut ctx = RetryContext::default();
//! ctx.begin_initial(5, Duration::from_secs(2));
//!
//! ctx.record_attempt();
//! assert_eq!(ctx.delay_before_next(&steady), Some(Duration::from_secs(2)));
//! ```

pub mod backoff;
pub mod error;
pub mod retry_context;
pub mod timer;

// Re-export main types for convenience
pub use backoff::BackoffPolicy;
pub use error::ResilienceError;
pub use retry_context::{RetryContext, RetryPhase};
pub use timer::{RetryTimer, TimerTicket};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use kiosklink_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::BackoffPolicy;
    pub use super::error::ResilienceError;
    pub use super::retry_context::{RetryContext, RetryPhase};
    pub use super::timer::{RetryTimer, TimerTicket};
}
