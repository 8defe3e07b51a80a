//! Error types for quotaguard operations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    BudgetExceeded,
    Throttled,
    NotFound,
    Timeout,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::Throttled => "THROTTLED",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Transient kinds that the retry loop attempts again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::NetworkError | Self::Throttled)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("{field} is too long: {length} > {max}")]
    TooLong {
        field: String,
        length: usize,
        max: usize,
    },

    #[error("{field} contains illegal character {character:?}")]
    IllegalCharacter { field: String, character: char },

    #[error("Value is not serializable: {reason}")]
    NotSerializable { reason: String },

    #[error("Value is too large: {size} bytes > {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Tracing initialization failed: {reason}")]
    TracingInit { reason: String },
}

/// Raw failure reported by the underlying storage client.
///
/// This carries only the client's text; [`ErrorKind`] is assigned by the
/// classifier in `quotaguard-throttle`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Master error type for all quotaguard errors.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request budget exhausted ({remaining} of {ceiling} remaining)")]
    BudgetExceeded { remaining: u32, ceiling: u32 },

    #[error("Throttled for another {retry_after:?}: {reason}")]
    Throttled { reason: String, retry_after: Duration },

    #[error("{kind} after {attempts} attempt(s): {message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },

    #[error("Queued {operation} request expired after {age:?}")]
    QueueTimeout { operation: String, age: Duration },
}

impl GuardError {
    /// Classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::InvalidInput,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::Remote { kind, .. } => *kind,
            Self::QueueTimeout { .. } => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for quotaguard operations.
pub type GuardResult<T> = Result<T, GuardError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::Throttled.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::BudgetExceeded.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(ErrorKind::NetworkError.to_string(), "NETWORK_ERROR");
        let json = serde_json::to_string(&ErrorKind::BudgetExceeded).unwrap();
        assert_eq!(json, "\"BUDGET_EXCEEDED\"");
    }

    #[test]
    fn test_validation_error_display_illegal_character() {
        let err = ValidationError::IllegalCharacter {
            field: "key".to_string(),
            character: '#',
        };
        let msg = format!("{}", err);
        assert!(msg.contains("key"));
        assert!(msg.contains("'#'"));
    }

    #[test]
    fn test_guard_error_kinds() {
        let validation = GuardError::from(ValidationError::RequiredFieldMissing {
            field: "key".to_string(),
        });
        assert_eq!(validation.kind(), ErrorKind::InvalidInput);

        let budget = GuardError::BudgetExceeded {
            remaining: 0,
            ceiling: 60,
        };
        assert_eq!(budget.kind(), ErrorKind::BudgetExceeded);
        assert!(!budget.is_retryable());

        let throttled = GuardError::Throttled {
            reason: "quota".to_string(),
            retry_after: Duration::from_secs(5),
        };
        assert_eq!(throttled.kind(), ErrorKind::Throttled);
        assert!(!throttled.is_retryable());

        let remote = GuardError::Remote {
            kind: ErrorKind::NetworkError,
            message: "connection reset".to_string(),
            attempts: 4,
        };
        assert_eq!(remote.kind(), ErrorKind::NetworkError);
        assert!(remote.is_retryable());

        let expired = GuardError::QueueTimeout {
            operation: "WRITE".to_string(),
            age: Duration::from_secs(301),
        };
        assert_eq!(expired.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_remote_error_display_is_raw_message() {
        let err = RemoteError::new("502: API Services rejected request");
        assert_eq!(err.to_string(), "502: API Services rejected request");
    }

    #[test]
    fn test_guard_error_display_remote() {
        let err = GuardError::Remote {
            kind: ErrorKind::Timeout,
            message: "request timed out".to_string(),
            attempts: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("TIMEOUT"));
        assert!(msg.contains("2 attempt"));
    }
}
