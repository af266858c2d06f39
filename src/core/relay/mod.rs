//! Realtime session relay.
//!
//! Bridges one client WebSocket to one upstream realtime-service WebSocket,
//! holding client traffic until the upstream session is configured.

pub mod connection;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod relay;
pub mod session;
pub mod session_config;
pub mod upstream;

pub use connection::{Connection, ConnectionReceiver, ConnectionSender, Direction};
pub use error::{RelayError, RelayResult};
pub use frame::{CloseReason, Frame};
pub use lifecycle::{LifecycleError, LifecycleEvent, SessionLifecycle, SessionState, next_state};
pub use queue::{DEFAULT_INBOUND_QUEUE_CAPACITY, InboundQueue, QueueError};
pub use relay::{DEFAULT_TEARDOWN_TIMEOUT, Relay, SessionOutcome};
pub use session::Session;
pub use session_config::{SessionSettings, TurnDetectionSettings, is_session_created};
pub use upstream::{DEFAULT_CONNECT_TIMEOUT, UpstreamConnector};
