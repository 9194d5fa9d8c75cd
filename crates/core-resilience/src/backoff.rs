//! Backoff policies: how long to wait before the next attempt
//!
//! Two shapes are used by the connection subsystem:
//!
//! - **Linear**: `base × attempt`. The bounded start-up phase waits 2s, 4s,
//!   6s, 8s between its five attempts.
//! - **Exponential**: `initial × multiplier^(attempt-1)`, capped at `max`.
//!   Used both by the transport's fast backup layer (1s → 5s cap) and by the
//!   unbounded steady-state scheduler (10s → 60s cap).
//!
//! Jitter is applied symmetrically as a fraction of the computed delay and
//! never pushes an exponential delay past its cap.
//!
//! # Example
//!
//! ```
//! use kiosklink_core_resilience::BackoffPolicy;
//! use std::time::Duration;
//!
//! let initial = BackoffPolicy::linear(Duration::from_secs(2));
//! assert_eq!(initial.delay_for(3), Duration::from_secs(6));
//!
//! let steady = BackoffPolicy::exponential(
//!     Duration::from_secs(10),
//!     2.0,
//!     Duration::from_secs(60),
//! );
//! assert_eq!(steady.delay_for(1), Duration::from_secs(10));
//! assert_eq!(steady.delay_for(3), Duration::from_secs(40));
//! assert_eq!(steady.delay_for(9), Duration::from_secs(60));
//! ```

use crate::error::ResilienceError;
use rand::Rng;
use std::time::Duration;

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// `base × attempt`, no cap
    Linear { base: Duration },

    /// `initial × multiplier^(attempt-1)`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        /// Fraction of the delay (0.0 - 1.0) randomly added or removed
        jitter: f64,
    },
}

impl BackoffPolicy {
    /// Linear policy (`base × attempt`)
    pub fn linear(base: Duration) -> Self {
        BackoffPolicy::Linear { base }
    }

    /// Capped exponential policy without jitter
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        BackoffPolicy::Exponential {
            initial,
            multiplier,
            max,
            jitter: 0.0,
        }
    }

    /// Return a copy of this policy with jitter applied (exponential only)
    pub fn with_jitter(self, fraction: f64) -> Self {
        match self {
            BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
                jitter: fraction,
            },
            other => other,
        }
    }

    /// Deterministic delay before attempt `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            BackoffPolicy::Linear { base } => base.saturating_mul(attempt),
            BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let delay_ms = initial.as_millis() as f64 * factor;
                if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
                    max
                } else {
                    Duration::from_millis(delay_ms as u64).min(max)
                }
            }
        }
    }

    /// Delay before attempt `attempt` with jitter applied, if configured.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        match *self {
            BackoffPolicy::Exponential { jitter, max, .. } if jitter > 0.0 => {
                let spread = base.as_millis() as f64 * jitter;
                let offset = rand::rng().random_range(-spread..=spread);
                let jittered = (base.as_millis() as f64 + offset).max(0.0) as u64;
                Duration::from_millis(jittered).min(max)
            }
            _ => base,
        }
    }

    /// Longest delay this policy can ever produce, if bounded
    pub fn ceiling(&self) -> Option<Duration> {
        match *self {
            BackoffPolicy::Linear { .. } => None,
            BackoffPolicy::Exponential { max, .. } => Some(max),
        }
    }

    /// Shortest delay this policy produces (the delay before attempt 1)
    pub fn floor(&self) -> Duration {
        self.delay_for(1)
    }

    /// Shortest delay [`jittered_delay_for`](Self::jittered_delay_for) can produce
    pub fn jittered_floor(&self) -> Duration {
        match *self {
            BackoffPolicy::Exponential { jitter, .. } if jitter > 0.0 && jitter < 1.0 => {
                self.floor().mul_f64(1.0 - jitter)
            }
            _ => self.floor(),
        }
    }

    /// Validate the policy parameters
    pub fn validate(&self) -> Result<(), ResilienceError> {
        match *self {
            BackoffPolicy::Linear { base } if base.is_zero() => Err(
                ResilienceError::InvalidPolicy("linear base delay must be greater than 0".to_string()),
            ),
            BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                if initial.is_zero() {
                    return Err(ResilienceError::InvalidPolicy(
                        "initial delay must be greater than 0".to_string(),
                    ));
                }
                if max < initial {
                    return Err(ResilienceError::InvalidPolicy(format!(
                        "max delay {:?} is below initial delay {:?}",
                        max, initial
                    )));
                }
                if multiplier.is_nan() || multiplier < 1.0 {
                    return Err(ResilienceError::InvalidPolicy(
                        "multiplier must be at least 1.0".to_string(),
                    ));
                }
                if !(0.0..1.0).contains(&jitter) {
                    return Err(ResilienceError::InvalidPolicy(
                        "jitter must be within [0.0, 1.0)".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
