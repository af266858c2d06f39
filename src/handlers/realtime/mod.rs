//! Realtime relay WebSocket handler
//!
//! `GET /realtime` upgrades the client connection and bridges it to one
//! upstream realtime session.
//!
//! ## Client → Server
//!
//! Any text or binary frame. Frames sent before the upstream session is
//! configured are held and delivered in order once it is.
//!
//! ## Server → Client
//!
//! Every upstream event except `session.created`, unchanged. If the session
//! fails the relay sends one error event and closes:
//!
//! ```json
//! {"type":"error","error":{"type":"relay_error","code":"upstream_unavailable","message":"..."}}
//! ```

mod handler;

pub use handler::realtime_handler;
