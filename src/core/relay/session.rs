//! A single relay session: identity, lifecycle and the inbound queue.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;

use super::error::{RelayError, RelayResult};
use super::frame::Frame;
use super::lifecycle::{LifecycleError, LifecycleEvent, SessionLifecycle, SessionState};
use super::queue::InboundQueue;

/// One end-to-end relay instance. Single use: once terminal, it stays terminal.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: SystemTime,
    lifecycle: SessionLifecycle,
    queue: InboundQueue,
    config_frame: Arc<str>,
}

impl Session {
    pub fn new(config_frame: Arc<str>, queue_capacity: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: SystemTime::now(),
            lifecycle: SessionLifecycle::new(),
            queue: InboundQueue::with_capacity(queue_capacity),
            config_frame,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.lifecycle.subscribe()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Whether reading more client frames would overflow the queue.
    pub fn queue_is_full(&self) -> bool {
        self.state() == SessionState::Connecting && self.queue.is_full()
    }

    /// Buffer a client frame received before the upstream is ready. Only
    /// valid while connecting; relayed frames never pass through the session.
    pub fn enqueue_client_frame(&mut self, frame: Frame) -> RelayResult<()> {
        match self.state() {
            SessionState::Connecting => Ok(self.queue.enqueue(frame)?),
            SessionState::Closed | SessionState::Failed => Err(RelayError::SessionClosed),
            state => Err(RelayError::ProtocolViolation(format!(
                "client frames are only queued while connecting, session is {state}"
            ))),
        }
    }

    /// Read-ahead bound shared by the inbound queue and the relay pumps.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// `connecting -> upstream_ready`. Returns the configuration frame that
    /// must reach the upstream before any client frame.
    pub fn upstream_initialized(&mut self) -> RelayResult<Frame> {
        self.lifecycle.apply(LifecycleEvent::UpstreamInitialized)?;
        Ok(Frame::Text(self.config_frame.to_string()))
    }

    /// Take the buffered client frames, in arrival order. Only valid in
    /// `upstream_ready`, and only once.
    pub fn drain_queue(&mut self) -> RelayResult<Vec<Frame>> {
        let state = self.state();
        if state != SessionState::UpstreamReady {
            return Err(LifecycleError::InvalidTransition {
                from: state,
                event: LifecycleEvent::QueueDrained,
            }
            .into());
        }
        Ok(self.queue.drain()?)
    }

    /// `upstream_ready -> relaying`, once the drained frames are sent.
    pub fn queue_drained(&mut self) -> RelayResult<()> {
        if !self.queue.is_sealed() {
            return Err(RelayError::ProtocolViolation(
                "inbound queue must be drained before relaying".to_string(),
            ));
        }
        self.lifecycle.apply(LifecycleEvent::QueueDrained)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<SessionState, LifecycleError> {
        self.lifecycle.apply(LifecycleEvent::Closed)
    }

    pub fn fail(&mut self) -> Result<SessionState, LifecycleError> {
        self.lifecycle.apply(LifecycleEvent::Failed)
    }
}
