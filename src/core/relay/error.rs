//! Error types for the realtime session relay.

use thiserror::Error;

use super::frame::{CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};
use super::lifecycle::LifecycleError;
use super::queue::QueueError;

/// Errors that can terminate or reject work on a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream refused the server-held credential during the handshake
    #[error("Upstream rejected credentials: {0}")]
    UpstreamRejected(String),

    /// The upstream could not be reached or the handshake did not complete
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A peer sent something the relay cannot accept in the current phase
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reading from or writing to a connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connector settings are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The session or connection has already been closed
    #[error("Session closed")]
    SessionClosed,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl RelayError {
    /// Machine-readable code carried in the error frame sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UpstreamRejected(_) => "upstream_rejected",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Transport(_) => "transport_error",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::SessionClosed => "session_closed",
            Self::Lifecycle(_) => "session_state_error",
            Self::Queue(_) => "inbound_queue_error",
        }
    }

    /// WebSocket close code used when this error ends a session.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::UpstreamRejected(_) | Self::ProtocolViolation(_) => CLOSE_POLICY_VIOLATION,
            _ => CLOSE_INTERNAL_ERROR,
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            RelayError::UpstreamRejected("401".into()).code(),
            "upstream_rejected"
        );
        assert_eq!(
            RelayError::UpstreamUnavailable("refused".into()).code(),
            "upstream_unavailable"
        );
        assert_eq!(RelayError::SessionClosed.code(), "session_closed");
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(
            RelayError::UpstreamRejected("401".into()).close_code(),
            CLOSE_POLICY_VIOLATION
        );
        assert_eq!(
            RelayError::Transport("reset".into()).close_code(),
            CLOSE_INTERNAL_ERROR
        );
    }

    #[test]
    fn test_queue_error_converts() {
        let err: RelayError = QueueError::Drained.into();
        assert!(matches!(err, RelayError::Queue(QueueError::Drained)));
        assert_eq!(err.code(), "inbound_queue_error");
    }
}
