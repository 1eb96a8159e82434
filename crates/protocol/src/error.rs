//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way a request can be rejected
/// before it reaches a session.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    // Envelope errors
    /// The request body is not a valid JSON request envelope.
    #[error("invalid request: {0}")]
    Malformed(String),

    /// The envelope names an action the daemon does not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    // Action data errors
    /// The `data` object does not match the action's expected shape.
    #[error("invalid {action} request: {reason}")]
    InvalidData {
        /// Action whose data failed to parse.
        action: String,
        /// Parser message.
        reason: String,
    },

    /// A session-scoped action was sent without a session ID.
    #[error("session ID is required")]
    MissingSessionId,

    /// Resize dimensions were zero or negative.
    #[error("cols and rows must be positive")]
    NonPositiveDimensions {
        /// Requested columns.
        cols: i64,
        /// Requested rows.
        rows: i64,
    },

    /// Resize dimensions do not fit a terminal window size.
    #[error("cols and rows must not exceed {max}")]
    DimensionsTooLarge {
        /// Largest accepted value.
        max: u16,
    },

    // Encoding errors
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Malformed(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_action_display() {
        let err = ProtocolError::UnknownAction("reboot".to_string());
        assert_eq!(err.to_string(), "unknown action: reboot");
    }

    #[test]
    fn test_invalid_data_display() {
        let err = ProtocolError::InvalidData {
            action: "write".to_string(),
            reason: "expected a string".to_string(),
        };
        assert_eq!(err.to_string(), "invalid write request: expected a string");
    }

    #[test]
    fn test_dimension_errors_display() {
        let err = ProtocolError::NonPositiveDimensions { cols: 0, rows: 24 };
        assert_eq!(err.to_string(), "cols and rows must be positive");

        let err = ProtocolError::DimensionsTooLarge { max: u16::MAX };
        assert_eq!(err.to_string(), "cols and rows must not exceed 65535");
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
