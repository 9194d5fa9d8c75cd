//! Error types for the kiosklink-connect crate

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("WebSocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Polling transport error: {0}")]
    Polling(#[from] reqwest::Error),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Backend rejected authentication: {reason}")]
    AuthRejected { reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No network connection")]
    NoNetwork,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection manager has been disposed")]
    Disposed,

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure taxonomy the retry logic reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Host is unreachable; attempts are skipped, not failed
    NoNetwork,
    /// Handshake, timeout or protocol failure; always retried
    TransportFailure,
    /// Backend explicitly rejected the identity; retried like a transport failure
    AuthRejected,
    /// Caller misuse or bad configuration; not retried
    Fatal,
}

impl ConnectError {
    /// Classify this error for retry purposes
    pub fn kind(&self) -> FailureKind {
        match self {
            ConnectError::NoNetwork => FailureKind::NoNetwork,
            ConnectError::AuthRejected { .. } => FailureKind::AuthRejected,
            ConnectError::InvalidEndpoint { .. }
            | ConnectError::InvalidConfig(_)
            | ConnectError::Disposed => FailureKind::Fatal,
            ConnectError::WebSocket(_)
            | ConnectError::Polling(_)
            | ConnectError::HandshakeFailed(_)
            | ConnectError::Timeout(_)
            | ConnectError::Protocol(_)
            | ConnectError::Json(_)
            | ConnectError::Io(_) => FailureKind::TransportFailure,
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() != FailureKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_auth_rejection_is_retryable() {
        let err = ConnectError::AuthRejected {
            reason: "expired token".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::AuthRejected);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(ConnectError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(ConnectError::HandshakeFailed("reset".to_string()).is_retryable());
        assert_eq!(
            ConnectError::Protocol("bad frame".to_string()).kind(),
            FailureKind::TransportFailure
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(!ConnectError::Disposed.is_retryable());
        assert!(!ConnectError::InvalidConfig("x".to_string()).is_retryable());
        assert_eq!(ConnectError::NoNetwork.kind(), FailureKind::NoNetwork);
    }
}
