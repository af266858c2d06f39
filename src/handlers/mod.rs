//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `realtime` - Realtime session relay WebSocket

pub mod api;
pub mod realtime;

// Re-export commonly used handlers for convenient access
pub use api::health_check;
pub use realtime::realtime_handler;
