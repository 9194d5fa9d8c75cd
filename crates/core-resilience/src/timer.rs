//! RetryTimer: at most one outstanding scheduled retry
//!
//! Scheduling a new timer always cancels the previous one first, so two
//! retry paths can never race each other. Every schedule returns a
//! [`TimerTicket`]; the owner re-checks the ticket when the callback runs
//! (`acknowledge`) so a callback that was already in flight when the timer
//! got replaced is ignored instead of acting twice.
//!
//! # Example
//!
//! ```no_run
//! use kiosklink_core_resilience::RetryTimer;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mut timer = RetryTimer::new();
//! timer.schedule(Duration::from_secs(10), |ticket| async move {
//!     println!("retry {:?} fired", ticket);
//! });
//! assert!(timer.is_pending());
//!
//! // Rescheduling replaces the first timer; only the second fires
//! timer.schedule(Duration::from_secs(2), |_| async {});
//! timer.cancel();
//! assert!(!timer.is_pending());
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Identifies one scheduling of a [`RetryTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket(u64);

impl TimerTicket {
    /// Sequence number of this scheduling
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// A single-slot cancelable timer backed by a Tokio task.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Default)]
pub struct RetryTimer {
    generation: u64,
    pending: Option<PendingTimer>,
}

#[derive(Debug)]
struct PendingTimer {
    ticket: TimerTicket,
    handle: JoinHandle<()>,
}

impl RetryTimer {
    /// Create an idle timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire` to run after `delay`, cancelling any previous timer.
    pub fn schedule<F, Fut>(&mut self, delay: Duration, on_fire: F) -> TimerTicket
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        self.generation += 1;
        let ticket = TimerTicket(self.generation);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(ticket).await;
        });

        trace!(ticket = ticket.0, delay_ms = delay.as_millis() as u64, "Retry timer scheduled");

        self.pending = Some(PendingTimer { ticket, handle });

        ticket
    }

    /// Cancel the outstanding timer, if any.
    ///
    /// Returns `true` if a timer was pending. A cancelled timer never runs
    /// its callback.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                trace!(ticket = pending.ticket.0, "Retry timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Called from the fired callback: returns `true` if `ticket` is still
    /// the outstanding timer and clears it.
    ///
    /// A `false` result means the timer was replaced or cancelled while the
    /// callback was starting, and the callback must do nothing.
    pub fn acknowledge(&mut self, ticket: TimerTicket) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                // Dropping the handle detaches; the callback keeps running.
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a timer is currently outstanding
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
