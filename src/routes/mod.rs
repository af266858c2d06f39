//! Router assembly

pub mod api;
pub mod realtime;

use std::sync::Arc;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{self, AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// CORS policy from a comma-separated origin list, `*` (the default) for
/// any origin.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    match origins.map(str::trim).unwrap_or("*") {
        "*" => base.allow_origin(Any).allow_credentials(false),
        origins => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins).allow_credentials(true)
        }
    }
}

/// Build the application: health check, realtime relay, CORS and
/// security headers. Rate limiting is layered on by the binary since it
/// needs the peer address.
pub fn create_app(state: Arc<AppState>) -> Router {
    // Layer order (outer to inner): connection_limit -> handler
    let realtime_routes = realtime::create_realtime_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );

    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    api::create_api_router()
        .merge(realtime_routes)
        .with_state(state)
        .layer(cors)
        .layer(security_headers)
}
