//! Error types for the resilience primitives

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}
