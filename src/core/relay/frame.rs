//! Message frames exchanged on either side of a relay session.
//!
//! A [`Frame`] is the transport-neutral unit the relay moves around. Text and
//! binary payloads are carried verbatim; the relay never rewrites them. Close
//! frames are modelled explicitly so that close codes and reasons can be
//! propagated from one side to the other. Ping/pong frames are handled by the
//! WebSocket implementations themselves and never surface as `Frame`s.

use axum::extract::ws;
use bytes::Bytes;
use serde_json::json;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (client disconnect, server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Credential or protocol rules were violated.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Unexpected condition on the relay or upstream side.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_GOING_AWAY, reason)
    }
}

/// A single discrete message on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Close(_) => "close",
        }
    }

    /// Payload size in bytes (zero for close frames).
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
            Self::Close(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Error event synthesized by the relay itself.
    ///
    /// The shape follows the upstream's own `error` events so clients can
    /// handle relay failures and upstream failures with one code path.
    pub fn relay_error(code: &str, message: &str) -> Self {
        let event = json!({
            "type": "error",
            "error": {
                "type": "relay_error",
                "code": code,
                "message": message,
            }
        });
        Self::Text(event.to_string())
    }

    /// Convert an inbound (axum) WebSocket message. Returns `None` for
    /// ping/pong, which the server answers on its own.
    pub fn from_axum(message: ws::Message) -> Option<Self> {
        match message {
            ws::Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            ws::Message::Binary(data) => Some(Self::Binary(data)),
            ws::Message::Close(frame) => Some(Self::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.as_str().to_owned(),
            }))),
            ws::Message::Ping(_) | ws::Message::Pong(_) => None,
        }
    }

    pub fn into_axum(self) -> ws::Message {
        match self {
            Self::Text(text) => ws::Message::Text(text.into()),
            Self::Binary(data) => ws::Message::Binary(data),
            Self::Close(reason) => ws::Message::Close(reason.map(|r| ws::CloseFrame {
                code: r.code,
                reason: r.reason.into(),
            })),
        }
    }

    /// Convert an outbound (tungstenite) WebSocket message. Returns `None`
    /// for ping/pong and raw frames.
    pub fn from_tungstenite(message: tungstenite::Message) -> Option<Self> {
        match message {
            tungstenite::Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            tungstenite::Message::Binary(data) => Some(Self::Binary(data)),
            tungstenite::Message::Close(frame) => Some(Self::Close(frame.map(|f| CloseReason {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned(),
            }))),
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => None,
        }
    }

    pub fn into_tungstenite(self) -> tungstenite::Message {
        match self {
            Self::Text(text) => tungstenite::Message::Text(text.into()),
            Self::Binary(data) => tungstenite::Message::Binary(data),
            Self::Close(reason) => tungstenite::Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}
