//! Server Startup Tests
//!
//! Configuration loading, state construction and connection admission
//! against a server bound to a real socket.

mod mock_upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body, http::Request};
use futures::StreamExt;
use mock_upstream::{MockOptions, MockUpstream};
use realtime_relay::{AppState, ServerConfig, routes};
use serial_test::serial;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tower::util::ServiceExt;

fn create_minimal_config(upstream_url: String) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.upstream.url = upstream_url;
    config.set_api_key("sk-startup");
    config
}

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let app: Router = routes::create_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[test]
#[serial]
fn test_config_file_boot() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("relay.yaml");
    std::fs::write(
        &config_path,
        r#"
server:
  host: "127.0.0.1"
  port: 4100
upstream:
  url: "ws://127.0.0.1:9/v1/realtime"
  api_key: "sk-from-file"
relay:
  inbound_queue_capacity: 16
session:
  voice: "verse"
"#,
    )
    .unwrap();

    let config = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(config.address(), "127.0.0.1:4100");
    assert_eq!(config.relay.inbound_queue_capacity, 16);

    let state = AppState::new(config).unwrap();
    assert!(state.session_frame.contains("\"voice\":\"verse\""));
    assert_eq!(state.upstream.url().as_str(), "ws://127.0.0.1:9/v1/realtime");
}

#[test]
fn test_state_requires_credential() {
    let mut config = ServerConfig::default();
    config.upstream.api_key = None;
    assert!(AppState::new(config).is_err());
}

#[tokio::test]
async fn test_health_reports_no_sessions_at_boot() {
    let state = AppState::new(create_minimal_config(
        "ws://127.0.0.1:9/v1/realtime".to_string(),
    ))
    .unwrap();
    let response = routes::create_app(state)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn test_per_ip_limit_rejects_extra_sessions() {
    // Keep the first session waiting on the upstream
    let upstream = MockUpstream::start(MockOptions {
        created_delay: Duration::from_secs(3),
        ..Default::default()
    })
    .await;
    let mut config = create_minimal_config(upstream.url());
    config.max_connections_per_ip = 1;
    let state = AppState::new(config).unwrap();
    let addr = serve(state.clone()).await;

    let (mut first, _) = connect_async(format!("ws://{addr}/realtime"))
        .await
        .unwrap();

    match connect_async(format!("ws://{addr}/realtime")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 429),
        other => panic!("expected 429, got {other:?}"),
    }
    assert_eq!(state.ws_connection_count(), 1);

    first.close(None).await.unwrap();
    while let Some(Ok(_)) = first.next().await {}
}

#[tokio::test]
async fn test_upgrades_refused_during_shutdown() {
    let state = AppState::new(create_minimal_config(
        "ws://127.0.0.1:9/v1/realtime".to_string(),
    ))
    .unwrap();
    let addr = serve(state.clone()).await;

    state.begin_shutdown();

    match connect_async(format!("ws://{addr}/realtime")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected 503, got {other:?}"),
    }
}
