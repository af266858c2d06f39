//! Duplex connections owned by a relay session.
//!
//! A [`Connection`] is split into a [`ConnectionSender`] and a
//! [`ConnectionReceiver`] so the two forwarding directions can hold the read
//! half of one connection and the write half of the other at the same time.

use std::fmt;
use std::pin::Pin;

use axum::extract::ws::WebSocket;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::error::{RelayError, RelayResult};
use super::frame::{CloseReason, Frame};

type FrameSink = Pin<Box<dyn Sink<Frame, Error = RelayError> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = RelayResult<Frame>> + Send>>;

/// Which side of the relay a connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client-facing connection accepted by the relay
    Inbound,
    /// Upstream-facing connection opened by the relay
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write half of a connection.
pub struct ConnectionSender {
    direction: Direction,
    sink: FrameSink,
    open: bool,
}

impl ConnectionSender {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether frames may still be written.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send one frame. Sending a close frame marks the sender closed.
    pub async fn send(&mut self, frame: Frame) -> RelayResult<()> {
        if !self.open {
            return Err(RelayError::SessionClosed);
        }
        if frame.is_close() {
            self.open = false;
        }
        self.sink.send(frame).await
    }

    /// The peer closed its side; the transport replies to the close
    /// handshake itself, so no further close frame is written.
    pub fn mark_peer_closed(&mut self) {
        self.open = false;
    }

    /// Send a close frame if still open, then flush and shut the sink.
    /// Calling this on a closed sender only flushes.
    pub async fn close(&mut self, reason: Option<CloseReason>) {
        if self.open {
            self.open = false;
            if let Err(e) = self.sink.send(Frame::Close(reason)).await {
                debug!(direction = %self.direction, "Close frame not delivered: {}", e);
            }
        }
        if let Err(e) = self.sink.close().await {
            debug!(direction = %self.direction, "Connection shutdown incomplete: {}", e);
        }
    }
}

/// Read half of a connection.
pub struct ConnectionReceiver {
    direction: Direction,
    stream: FrameStream,
}

impl ConnectionReceiver {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Next frame from the peer; `None` once the transport has ended.
    pub async fn recv(&mut self) -> Option<RelayResult<Frame>> {
        self.stream.next().await
    }
}

/// A duplex channel of [`Frame`]s.
pub struct Connection {
    pub tx: ConnectionSender,
    pub rx: ConnectionReceiver,
}

impl Connection {
    /// Build a connection from any frame sink/stream pair.
    pub fn new<Si, St>(direction: Direction, sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = RelayError> + Send + 'static,
        St: Stream<Item = RelayResult<Frame>> + Send + 'static,
    {
        Self {
            tx: ConnectionSender {
                direction,
                sink: Box::pin(sink),
                open: true,
            },
            rx: ConnectionReceiver {
                direction,
                stream: Box::pin(stream),
            },
        }
    }

    /// Wrap an upgraded client socket.
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| RelayError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_axum())));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_axum(message).map(Ok),
                Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
            })
        });
        Self::new(Direction::Inbound, sink, stream)
    }

    /// Wrap a tungstenite WebSocket (the upstream side in production).
    pub fn from_tungstenite<S>(direction: Direction, socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| RelayError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_tungstenite())));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_tungstenite(message).map(Ok),
                Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
            })
        });
        Self::new(direction, sink, stream)
    }

    pub fn direction(&self) -> Direction {
        self.tx.direction
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_open()
    }

    /// Receive the next frame, tracking peer-initiated closes.
    pub async fn recv(&mut self) -> Option<RelayResult<Frame>> {
        let next = self.rx.recv().await;
        if matches!(next, None | Some(Ok(Frame::Close(_)))) {
            self.tx.mark_peer_closed();
        }
        next
    }

    pub async fn send(&mut self, frame: Frame) -> RelayResult<()> {
        self.tx.send(frame).await
    }

    pub async fn close(&mut self, reason: Option<CloseReason>) {
        self.tx.close(reason).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::memory_connection;
    use super::*;

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (mut connection, mut peer) = memory_connection(Direction::Outbound, 8);
        connection.close(Some(CloseReason::going_away("done"))).await;
        assert!(!connection.is_open());
        assert_eq!(
            peer.recv().await,
            Some(Frame::Close(Some(CloseReason::going_away("done"))))
        );
        let result = connection.send(Frame::Text("late".into())).await;
        assert!(matches!(result, Err(RelayError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_peer_close_marks_sender_closed() {
        let (mut connection, peer) = memory_connection(Direction::Inbound, 8);
        peer.send(Frame::Close(None));
        assert_eq!(connection.recv().await.unwrap().unwrap(), Frame::Close(None));
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let (mut connection, mut peer) = memory_connection(Direction::Outbound, 8);
        connection.close(None).await;
        connection.close(None).await;
        assert_eq!(peer.recv().await, Some(Frame::Close(None)));
        assert_eq!(peer.recv().await, None);
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.as_str(), "outbound");
    }
}
