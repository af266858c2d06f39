//! WebSocket mock of the upstream realtime service.
//!
//! Records the handshake headers and every frame it receives, announces
//! `session.created` after a configurable delay, and answers scripted text
//! commands:
//! - `"drop"`: drop the TCP connection without a close handshake
//! - `"close"`: send a 1000 "done" close frame
//! - anything else: echo back as `{"type":"echo","text":...}`

// Each test binary uses a different subset
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Handshake {
        authorization: Option<String>,
        protocol_version: Option<String>,
    },
    Text(String),
    Binary(Vec<u8>),
    Closed(Option<(u16, String)>),
}

#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Refuse the handshake with this HTTP status
    pub reject_with: Option<u16>,
    /// Wait before announcing `session.created`
    pub created_delay: Duration,
    /// Send an unrelated event before `session.created`
    pub early_event: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            reject_with: None,
            created_delay: Duration::from_millis(200),
            early_event: false,
        }
    }
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<UpstreamEvent>,
}

impl MockUpstream {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    options.clone(),
                    events_tx.clone(),
                ));
            }
        });

        Self { addr, events }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime?model=test-model", self.addr)
    }

    pub async fn next_event(&mut self) -> UpstreamEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for upstream event")
            .expect("mock upstream stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    options: MockOptions,
    events: mpsc::UnboundedSender<UpstreamEvent>,
) {
    let handshake_events = events.clone();
    let reject_with = options.reject_with;
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let _ = handshake_events.send(UpstreamEvent::Handshake {
            authorization: header("authorization"),
            protocol_version: header("openai-beta"),
        });

        match reject_with {
            Some(status) => Err(http::Response::builder()
                .status(status)
                .body(Some("rejected by mock".to_string()))
                .unwrap()),
            None => Ok(response),
        }
    };

    let Ok(socket) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = socket.split();

    if options.early_event {
        let early = json!({"type": "rate_limits.updated", "rate_limits": []});
        if write.send(Message::text(early.to_string())).await.is_err() {
            return;
        }
    }
    tokio::time::sleep(options.created_delay).await;
    let created = json!({"type": "session.created", "session": {"id": "sess_mock"}});
    if write.send(Message::text(created.to_string())).await.is_err() {
        return;
    }

    while let Some(message) = read.next().await {
        let Ok(message) = message else {
            return;
        };
        match message {
            Message::Text(text) => {
                let text = text.to_string();
                let _ = events.send(UpstreamEvent::Text(text.clone()));

                let kind = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));
                let reply = match (kind.as_deref(), text.as_str()) {
                    (Some("session.update"), _) => {
                        Message::text(json!({"type": "session.updated"}).to_string())
                    }
                    (_, "drop") => return,
                    (_, "close") => Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "done".into(),
                    })),
                    _ => Message::text(json!({"type": "echo", "text": text}).to_string()),
                };
                if write.send(reply).await.is_err() {
                    return;
                }
            }
            Message::Binary(data) => {
                let _ = events.send(UpstreamEvent::Binary(data.to_vec()));
                if write.send(Message::Binary(data)).await.is_err() {
                    return;
                }
            }
            Message::Close(frame) => {
                let _ = events.send(UpstreamEvent::Closed(
                    frame.map(|f| (u16::from(f.code), f.reason.to_string())),
                ));
                return;
            }
            _ => {}
        }
    }
}
