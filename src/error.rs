/*!
 * Error types for Kiosklink
 */

use kiosklink_connect::{ConnectError, FailureKind};
use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, KioskError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum KioskError {
    /// Configuration file missing
    ConfigNotFound(PathBuf),

    /// Configuration could not be parsed or failed validation
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Error from the connection subsystem
    Connect(ConnectError),

    /// Initial connection phase ended without a session
    Degraded { attempts: u32 },

    /// Generic error with message
    Other(String),
}

impl KioskError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            KioskError::Degraded { .. } => EXIT_DEGRADED,
            KioskError::ConfigNotFound(_)
            | KioskError::Config(_)
            | KioskError::Io(_)
            | KioskError::Connect(_)
            | KioskError::Other(_) => EXIT_FATAL,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            KioskError::ConfigNotFound(_) | KioskError::Config(_) => ErrorCategory::Configuration,
            KioskError::Io(_) => ErrorCategory::IoError,
            KioskError::Connect(err) => match err.kind() {
                FailureKind::AuthRejected => ErrorCategory::Security,
                FailureKind::Fatal => ErrorCategory::Configuration,
                FailureKind::NoNetwork | FailureKind::TransportFailure => ErrorCategory::Network,
            },
            KioskError::Degraded { .. } => ErrorCategory::Retry,
            KioskError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// I/O operation errors
    IoError,
    /// Network/transport errors
    Network,
    /// Authentication/authorization errors
    Security,
    /// Retry exhaustion
    Retry,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for KioskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KioskError::ConfigNotFound(path) => {
                write!(
                    f,
                    "Configuration file not found: {} (run `kiosklink init` to create one)",
                    path.display()
                )
            }
            KioskError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            KioskError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            KioskError::Connect(err) => {
                write!(f, "{}", err)
            }
            KioskError::Degraded { attempts } => {
                write!(
                    f,
                    "Initial connection failed after {} attempts, reconnecting in the background",
                    attempts
                )
            }
            KioskError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for KioskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KioskError::Io(err) => Some(err),
            KioskError::Connect(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for KioskError {
    fn from(err: io::Error) -> Self {
        KioskError::Io(err)
    }
}

impl From<ConnectError> for KioskError {
    fn from(err: ConnectError) -> Self {
        KioskError::Connect(err)
    }
}

impl From<toml::de::Error> for KioskError {
    fn from(err: toml::de::Error) -> Self {
        KioskError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KioskError {
    fn from(err: toml::ser::Error) -> Self {
        KioskError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(KioskError::Degraded { attempts: 5 }.exit_code(), EXIT_DEGRADED);
        assert_eq!(KioskError::Config("bad".to_string()).exit_code(), EXIT_FATAL);
        assert_eq!(
            KioskError::ConfigNotFound(PathBuf::from("/nope")).exit_code(),
            EXIT_FATAL
        );
        assert_ne!(EXIT_SUCCESS, EXIT_DEGRADED);
    }

    #[test]
    fn test_connect_error_categories() {
        let rejected = KioskError::from(ConnectError::AuthRejected {
            reason: "expired".to_string(),
        });
        assert_eq!(rejected.category(), ErrorCategory::Security);

        let timeout = KioskError::from(ConnectError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(timeout.category(), ErrorCategory::Network);

        let disposed = KioskError::from(ConnectError::Disposed);
        assert_eq!(disposed.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_display() {
        let err = KioskError::Degraded { attempts: 5 };
        assert!(err.to_string().contains("5 attempts"));
        assert_eq!(ErrorCategory::Retry.to_string(), "retry");

        let err = KioskError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().starts_with("I/O error"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
