//! Realtime relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the Realtime WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade; the connection is relayed to the
/// configured upstream realtime service.
///
/// # Protocol
///
/// The relay is transparent apart from one step: when the upstream reports
/// `session.created`, the relay configures the upstream session itself and
/// then flushes anything the client sent in the meantime.
///
/// ```json
/// // Client sends upstream events as usual
/// {"type": "input_audio_buffer.append", "audio": "..."}
///
/// // Server forwards upstream events unchanged
/// {"type": "response.audio.delta", "delta": "..."}
/// ```
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
