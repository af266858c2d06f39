pub mod relay;

// Re-export commonly used types for convenience
pub use relay::{
    Connection, Direction, Frame, Relay, RelayError, RelayResult, Session, SessionOutcome,
    SessionSettings, SessionState, UpstreamConnector,
};
