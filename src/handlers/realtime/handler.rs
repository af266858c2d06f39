//! Realtime relay WebSocket handler
//!
//! Each upgraded connection becomes one relay [`Session`]. The upgraded-socket
//! task owned by axum runs the whole session; nothing is spawned per direction.

use axum::{
    Extension,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::relay::{Connection, Relay, Session};
use crate::errors::AppError;
use crate::middleware::ClientIp;
use crate::state::{AppState, ConnectionGuard};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Realtime WebSocket handler
///
/// Upgrades the HTTP connection and relays it to the upstream realtime
/// service. A request that is not a valid WebSocket upgrade gets a JSON
/// `400 Bad Request`.
pub async fn realtime_handler(
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Slot reserved by the connection limit middleware, released when the
    // session task ends or the upgrade never happens.
    let client_ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    let guard = client_ip.map(|ip| ConnectionGuard::new(state.clone(), ip));

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(ip = ?client_ip, "Rejected realtime request: {}", rejection);
            return AppError::BadRequest(rejection.body_text()).into_response();
        }
    };

    info!(ip = ?client_ip, "Realtime WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_failed_upgrade(|e| warn!("Realtime WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            let _guard = guard;
            handle_realtime_socket(socket, state, client_ip).await;
        })
}

/// Run one relay session over the upgraded socket.
async fn handle_realtime_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    client_ip: Option<std::net::IpAddr>,
) {
    let session = Session::new(
        state.session_frame.clone(),
        state.config.relay.inbound_queue_capacity,
    );
    let _registration = state.sessions.register(&session, client_ip);

    let relay = Relay::new(
        session,
        Connection::from_axum(socket),
        state.config.relay.teardown_timeout(),
        state.shutdown_token(),
    );
    let outcome = relay.run(state.upstream.connect()).await;

    if let Some(error) = &outcome.error {
        warn!(
            session_id = %outcome.session_id,
            code = error.code(),
            "Realtime session failed: {}",
            error
        );
    }
}
