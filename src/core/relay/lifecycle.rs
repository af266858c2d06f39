//! Session lifecycle state machine.
//!
//! ```text
//! connecting ──UpstreamInitialized──▶ upstream_ready ──QueueDrained──▶ relaying
//!     │                                    │                              │
//!     └──────────── Closed ───────────────┴──────────────────────────────┴──▶ closed
//!     └──────────── Failed ───────────────┴──────────────────────────────┴──▶ failed
//! ```
//!
//! `closed` and `failed` are terminal. Every (state, event) pair has exactly
//! one outcome: the next state, or a [`LifecycleError`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    UpstreamReady,
    Relaying,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::UpstreamReady => "upstream_ready",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Upstream sent its session-initialized signal
    UpstreamInitialized,
    /// Configuration frame sent and queued client frames flushed upstream
    QueueDrained,
    /// Clean close on either connection
    Closed,
    /// Unrecoverable error on either connection
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Session already ended in state {0}")]
    Terminated(SessionState),

    #[error("Event {event:?} is not valid in state {from}")]
    InvalidTransition {
        from: SessionState,
        event: LifecycleEvent,
    },
}

/// Pure transition function.
pub fn next_state(
    from: SessionState,
    event: LifecycleEvent,
) -> Result<SessionState, LifecycleError> {
    use LifecycleEvent as E;
    use SessionState as S;

    match (from, event) {
        (S::Closed | S::Failed, _) => Err(LifecycleError::Terminated(from)),
        (S::Connecting, E::UpstreamInitialized) => Ok(S::UpstreamReady),
        (S::UpstreamReady, E::QueueDrained) => Ok(S::Relaying),
        (_, E::Closed) => Ok(S::Closed),
        (_, E::Failed) => Ok(S::Failed),
        (from, event) => Err(LifecycleError::InvalidTransition { from, event }),
    }
}

/// Owns the current state of one session and publishes every change.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    publisher: watch::Sender<SessionState>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(SessionState::Connecting);
        Self {
            state: SessionState::Connecting,
            publisher,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Observe state changes from outside the session task.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.publisher.subscribe()
    }

    /// Apply an event; on error the state is left untouched.
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<SessionState, LifecycleError> {
        let next = next_state(self.state, event)?;
        tracing::debug!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
        self.publisher.send_replace(next);
        Ok(next)
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
