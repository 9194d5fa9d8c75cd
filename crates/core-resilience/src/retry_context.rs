//! RetryContext: attempt bookkeeping for one connect sequence
//!
//! A context is scoped to a connect sequence. It is reset to zero whenever
//! the connection is intentionally torn down, or when the host regains
//! network reachability (a fresh cycle, not a continuation of the previous
//! backoff).
//!
//! The context only counts; the caller decides what an attempt is and
//! how long to wait, using [`RetryContext::delay_before_next`].

use crate::backoff::BackoffPolicy;
use crate::error::ResilienceError;
use std::time::Duration;

/// Which retry budget an attempt counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// No retry activity
    Idle,
    /// Bounded start-up phase (`max_attempts` applies)
    Initial,
    /// Unbounded steady-state reconnection
    Steady,
}

/// Attempt counters for the active connect sequence
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    phase: RetryPhase,
}

impl RetryContext {
    /// Create an idle context with the bounded-phase parameters
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
            phase: RetryPhase::Idle,
        }
    }

    /// Start the bounded initial phase with fresh counters
    pub fn begin_initial(&mut self, max_attempts: u32, base_delay: Duration) {
        self.attempt = 0;
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self.phase = RetryPhase::Initial;
    }

    /// Start an unbounded steady-state cycle with fresh counters
    pub fn begin_steady(&mut self) {
        self.attempt = 0;
        self.phase = RetryPhase::Steady;
    }

    /// Count one more attempt and return its 1-based number
    pub fn record_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Reset counters to zero without changing the phase
    pub fn reset_attempts(&mut self) {
        self.attempt = 0;
    }

    /// Reset counters and return to idle
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.phase = RetryPhase::Idle;
    }

    /// Delay to wait after the current attempt, or `None` after the final
    /// attempt of the initial phase.
    ///
    /// Initial phase: `base_delay × attempt`. Steady phase: `steady` policy.
    pub fn delay_before_next(&self, steady: &BackoffPolicy) -> Option<Duration> {
        match self.phase {
            RetryPhase::Initial if self.attempt >= self.max_attempts => None,
            RetryPhase::Initial => {
                Some(BackoffPolicy::linear(self.base_delay).delay_for(self.attempt))
            }
            RetryPhase::Steady => Some(steady.jittered_delay_for(self.attempt.saturating_add(1))),
            RetryPhase::Idle => None,
        }
    }

    /// Current attempt number (0 before the first attempt)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt budget of the initial phase
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay of the initial phase
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Current phase
    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Validate the initial-phase parameters
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        BackoffPolicy::linear(self.base_delay).validate()
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady() -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_secs(10), 2.0, Duration::from_secs(60))
    }

    #[test]
    fn test_default_context() {
        let ctx = RetryContext::default();
        assert_eq!(ctx.attempt(), 0);
        assert_eq!(ctx.max_attempts(), 5);
        assert_eq!(ctx.base_delay(), Duration::from_secs(2));
        assert_eq!(ctx.phase(), RetryPhase::Idle);
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_initial_phase_delays() {
        let mut ctx = RetryContext::default();
        ctx.begin_initial(5, Duration::from_secs(2));

        let mut delays = Vec::new();
        for _ in 0..5 {
            ctx.record_attempt();
            delays.push(ctx.delay_before_next(&steady()));
        }

        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(6)),
                Some(Duration::from_secs(8)),
                None,
            ]
        );
        assert_eq!(ctx.attempt(), 5);
    }

    #[test]
    fn test_steady_phase_is_unbounded() {
        let mut ctx = RetryContext::default();
        ctx.begin_steady();

        for _ in 0..100 {
            ctx.record_attempt();
        }

        assert_eq!(ctx.attempt(), 100);
        assert_eq!(ctx.delay_before_next(&steady()), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_steady_delay_tracks_next_attempt() {
        let mut ctx = RetryContext::default();
        ctx.begin_steady();

        assert_eq!(ctx.delay_before_next(&steady()), Some(Duration::from_secs(10)));
        ctx.record_attempt();
        assert_eq!(ctx.delay_before_next(&steady()), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_reset() {
        let mut ctx = RetryContext::default();
        ctx.begin_initial(3, Duration::from_secs(1));
        ctx.record_attempt();
        ctx.record_attempt();

        ctx.reset_attempts();
        assert_eq!(ctx.attempt(), 0);
        assert_eq!(ctx.phase(), RetryPhase::Initial);

        ctx.reset();
        assert_eq!(ctx.phase(), RetryPhase::Idle);
        assert_eq!(ctx.delay_before_next(&steady()), None);
    }

    #[test]
    fn test_validation() {
        assert!(RetryContext::new(0, Duration::from_secs(2)).validate().is_err());
        assert!(RetryContext::new(5, Duration::ZERO).validate().is_err());
    }
}
