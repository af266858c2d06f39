//! Per-session relay task.
//!
//! A [`Relay`] owns one [`Session`] and both of its connections. It runs in
//! three phases inside a single task:
//!
//! 1. connect: open the upstream while queueing client frames;
//! 2. handshake: wait for the upstream's `session.created`, still queueing;
//! 3. relaying: send the configuration frame, flush the queue, then pump
//!    both directions concurrently until either side ends.
//!
//! A send blocked by a slow peer never stops the source from being read:
//! up to the inbound queue capacity of frames are read ahead, so a close or
//! drop behind them still ends the session.
//!
//! Whatever ends the session, the other side is closed within the teardown
//! timeout and the lifecycle reaches exactly one terminal state.

use std::collections::VecDeque;
use std::iter;
use std::time::{Duration, Instant};

use futures::future;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::connection::{Connection, ConnectionReceiver, ConnectionSender};
use super::error::{RelayError, RelayResult};
use super::frame::{CloseReason, Frame};
use super::lifecycle::SessionState;
use super::session::Session;
use super::session_config::is_session_created;

pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    pub state: SessionState,
    pub error: Option<RelayError>,
    pub frames_to_upstream: u64,
    pub frames_to_client: u64,
    pub duration: Duration,
}

/// What ended the session.
#[derive(Debug)]
enum Ending {
    /// Client sent a close frame
    ClientClosed(Option<CloseReason>),
    /// Client transport ended or errored without a close frame
    ClientDropped,
    /// Upstream sent a close frame while relaying
    UpstreamClosed(Option<CloseReason>),
    /// Server is shutting down
    Shutdown,
    /// Session-fatal error
    Failed(RelayError),
}

/// How one forwarding direction stopped.
enum PumpEnd {
    PeerClosed(Option<CloseReason>),
    ReadEnded,
    ReadFailed(RelayError),
    WriteFailed(RelayError),
}

#[derive(Debug, Default)]
struct Counters {
    to_upstream: u64,
    to_client: u64,
}

pub struct Relay {
    session: Session,
    client: Connection,
    teardown_timeout: Duration,
    shutdown: CancellationToken,
    counters: Counters,
}

impl Relay {
    pub fn new(
        session: Session,
        client: Connection,
        teardown_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            client,
            teardown_timeout,
            shutdown,
            counters: Counters::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drive the session to completion. `connect` opens the upstream; it is
    /// dropped unfinished if the session ends first.
    pub async fn run<F>(self, connect: F) -> SessionOutcome
    where
        F: Future<Output = RelayResult<Connection>>,
    {
        let span = info_span!("relay_session", session_id = %self.session.id());
        self.run_session(connect).instrument(span).await
    }

    async fn run_session<F>(mut self, connect: F) -> SessionOutcome
    where
        F: Future<Output = RelayResult<Connection>>,
    {
        let started = Instant::now();
        info!("Session started");

        let error = match self.connect_upstream(connect).await {
            Ok(mut upstream) => {
                let ending = match self.await_upstream_ready(&mut upstream).await {
                    Ok(carried) => self.relay(&mut upstream, carried).await,
                    Err(ending) => ending,
                };
                self.teardown(Some(&mut upstream), ending).await
            }
            Err(ending) => self.teardown(None, ending).await,
        };

        let outcome = SessionOutcome {
            session_id: self.session.id().to_string(),
            state: self.session.state(),
            error,
            frames_to_upstream: self.counters.to_upstream,
            frames_to_client: self.counters.to_client,
            duration: started.elapsed(),
        };
        info!(
            state = %outcome.state,
            frames_to_upstream = outcome.frames_to_upstream,
            frames_to_client = outcome.frames_to_client,
            duration_ms = outcome.duration.as_millis() as u64,
            "Session ended"
        );
        outcome
    }

    /// Phase 1: open the upstream while queueing client frames.
    async fn connect_upstream<F>(&mut self, connect: F) -> Result<Connection, Ending>
    where
        F: Future<Output = RelayResult<Connection>>,
    {
        let shutdown = self.shutdown.clone();
        tokio::pin!(connect);

        loop {
            let queue_full = self.session.queue_is_full();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Err(Ending::Shutdown),

                result = &mut connect => {
                    return result.map_err(|e| {
                        error!(code = e.code(), "Upstream connect failed: {}", e);
                        Ending::Failed(e)
                    });
                }

                next = self.client.rx.recv(), if !queue_full => {
                    if let Some(ending) = self.queue_client_frame(next) {
                        return Err(ending);
                    }
                }
            }
        }
    }

    /// Phase 2: wait for the upstream's readiness signal, then flush.
    /// Returns client frames read during the flush, to be relayed first.
    async fn await_upstream_ready(
        &mut self,
        upstream: &mut Connection,
    ) -> Result<VecDeque<Frame>, Ending> {
        let shutdown = self.shutdown.clone();

        loop {
            let queue_full = self.session.queue_is_full();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Err(Ending::Shutdown),

                next = upstream.recv() => match next {
                    Some(Ok(Frame::Text(text))) if is_session_created(&text) => break,
                    Some(Ok(Frame::Close(reason))) => {
                        let detail = reason
                            .map(|r| format!("{} {}", r.code, r.reason))
                            .unwrap_or_else(|| "no reason".to_string());
                        return Err(Ending::Failed(RelayError::UpstreamUnavailable(format!(
                            "upstream closed before session was created ({detail})"
                        ))));
                    }
                    Some(Ok(frame)) => {
                        warn!(
                            kind = frame.kind(),
                            len = frame.len(),
                            "Dropping upstream frame received before session.created"
                        );
                    }
                    Some(Err(e)) => return Err(Ending::Failed(e)),
                    None => {
                        return Err(Ending::Failed(RelayError::UpstreamUnavailable(
                            "upstream disconnected before session was created".to_string(),
                        )));
                    }
                },

                next = self.client.rx.recv(), if !queue_full => {
                    if let Some(ending) = self.queue_client_frame(next) {
                        return Err(ending);
                    }
                }
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Ending::Shutdown),
            result = self.start_relaying(upstream) => result,
        }
    }

    fn queue_client_frame(&mut self, next: Option<RelayResult<Frame>>) -> Option<Ending> {
        match next {
            Some(Ok(Frame::Close(reason))) => Some(Ending::ClientClosed(reason)),
            Some(Ok(frame)) => match self.session.enqueue_client_frame(frame) {
                Ok(()) => {
                    debug!(queued = self.session.queued_frames(), "Client frame queued");
                    None
                }
                Err(e) => Some(Ending::Failed(e)),
            },
            Some(Err(e)) => {
                debug!("Client read failed: {}", e);
                Some(Ending::ClientDropped)
            }
            None => Some(Ending::ClientDropped),
        }
    }

    /// Configuration first, then the queued client frames in arrival order.
    /// The client is still read meanwhile so its close or drop is seen even
    /// if the upstream stops accepting frames.
    async fn start_relaying(
        &mut self,
        upstream: &mut Connection,
    ) -> Result<VecDeque<Frame>, Ending> {
        let config = self.session.upstream_initialized().map_err(Ending::Failed)?;
        let queued = self.session.drain_queue().map_err(Ending::Failed)?;
        let flushed = queued.len();
        let read_ahead = self.session.queue_capacity();
        let mut carried = VecDeque::new();

        for (index, frame) in iter::once(config).chain(queued).enumerate() {
            send_watching(
                frame,
                &mut self.client.rx,
                &mut upstream.tx,
                &mut carried,
                read_ahead,
            )
            .await
            .map_err(client_pump_ending)?;
            if index > 0 {
                self.counters.to_upstream += 1;
            }
        }
        self.session.queue_drained().map_err(Ending::Failed)?;

        info!(flushed, carried = carried.len(), "Session relaying");
        Ok(carried)
    }

    /// Phase 3: forward both directions until one ends.
    async fn relay(&mut self, upstream: &mut Connection, carried: VecDeque<Frame>) -> Ending {
        let read_ahead = self.session.queue_capacity();
        let Connection {
            tx: client_tx,
            rx: client_rx,
        } = &mut self.client;
        let Connection {
            tx: upstream_tx,
            rx: upstream_rx,
        } = upstream;
        let Counters {
            to_upstream,
            to_client,
        } = &mut self.counters;

        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => Ending::Shutdown,

            end = pump(client_rx, upstream_tx, carried, read_ahead, to_upstream) => {
                client_pump_ending(end)
            }

            end = pump(upstream_rx, client_tx, VecDeque::new(), read_ahead, to_client) => {
                upstream_pump_ending(end)
            }
        }
    }

    /// Record the terminal state and close whatever is still open.
    async fn teardown(
        &mut self,
        upstream: Option<&mut Connection>,
        ending: Ending,
    ) -> Option<RelayError> {
        let terminal = match &ending {
            Ending::Failed(_) => self.session.fail(),
            _ => self.session.close(),
        };
        if let Err(e) = terminal {
            debug!("Terminal transition skipped: {}", e);
        }

        let client = &mut self.client;
        let mut upstream_peer_closed = false;
        let (client_close, upstream_close, failure) = match ending {
            Ending::ClientClosed(reason) => {
                info!(?reason, "Client closed");
                client.tx.mark_peer_closed();
                (None, reason, None)
            }
            Ending::ClientDropped => {
                info!("Client disconnected");
                client.tx.mark_peer_closed();
                (None, Some(CloseReason::going_away("client disconnected")), None)
            }
            Ending::UpstreamClosed(reason) => {
                info!(?reason, "Upstream closed");
                upstream_peer_closed = true;
                (reason, None, None)
            }
            Ending::Shutdown => {
                info!("Closing session for server shutdown");
                let reason = CloseReason::going_away("server shutting down");
                (Some(reason.clone()), Some(reason), None)
            }
            Ending::Failed(e) => {
                error!(code = e.code(), "Session failed: {}", e);
                let reason = CloseReason::new(e.close_code(), e.code());
                (Some(reason.clone()), Some(reason), Some(e))
            }
        };
        let error_frame = failure
            .as_ref()
            .map(|e| Frame::relay_error(e.code(), &e.to_string()));

        let close_client = async {
            if let Some(frame) = error_frame {
                if client.tx.is_open() {
                    if let Err(e) = client.tx.send(frame).await {
                        debug!("Error frame not delivered: {}", e);
                    }
                }
            }
            client.tx.close(client_close).await;
        };
        let close_upstream = async {
            if let Some(upstream) = upstream {
                if upstream_peer_closed {
                    upstream.tx.mark_peer_closed();
                }
                upstream.tx.close(upstream_close).await;
            }
        };

        if timeout(self.teardown_timeout, future::join(close_client, close_upstream))
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.teardown_timeout.as_millis() as u64,
                "Teardown timed out"
            );
        }

        failure
    }
}

fn client_pump_ending(end: PumpEnd) -> Ending {
    match end {
        PumpEnd::PeerClosed(reason) => Ending::ClientClosed(reason),
        PumpEnd::ReadEnded => Ending::ClientDropped,
        PumpEnd::ReadFailed(e) => {
            debug!("Client read failed: {}", e);
            Ending::ClientDropped
        }
        PumpEnd::WriteFailed(e) => Ending::Failed(e),
    }
}

fn upstream_pump_ending(end: PumpEnd) -> Ending {
    match end {
        PumpEnd::PeerClosed(reason) => Ending::UpstreamClosed(reason),
        PumpEnd::ReadEnded => {
            Ending::Failed(RelayError::Transport("upstream connection dropped".to_string()))
        }
        PumpEnd::ReadFailed(e) => Ending::Failed(e),
        PumpEnd::WriteFailed(e) => {
            debug!("Client write failed: {}", e);
            Ending::ClientDropped
        }
    }
}

/// Forward frames until the source ends or a write fails. `pending` frames
/// were already read and go out first.
async fn pump(
    from: &mut ConnectionReceiver,
    to: &mut ConnectionSender,
    mut pending: VecDeque<Frame>,
    read_ahead: usize,
    forwarded: &mut u64,
) -> PumpEnd {
    loop {
        let frame = match pending.pop_front() {
            Some(frame) => frame,
            None => match read_frame(from.recv().await) {
                Ok(frame) => frame,
                Err(end) => return end,
            },
        };
        if let Err(end) = send_watching(frame, from, to, &mut pending, read_ahead).await {
            return end;
        }
        *forwarded += 1;
    }
}

/// Send one frame while still reading the source into `pending`, up to
/// `read_ahead` frames. The source ending abandons the send.
async fn send_watching(
    frame: Frame,
    from: &mut ConnectionReceiver,
    to: &mut ConnectionSender,
    pending: &mut VecDeque<Frame>,
    read_ahead: usize,
) -> Result<(), PumpEnd> {
    let send = to.send(frame);
    tokio::pin!(send);

    loop {
        let room = pending.len() < read_ahead;
        tokio::select! {
            biased;

            sent = &mut send => return sent.map_err(PumpEnd::WriteFailed),

            next = from.recv(), if room => pending.push_back(read_frame(next)?),
        }
    }
}

fn read_frame(next: Option<RelayResult<Frame>>) -> Result<Frame, PumpEnd> {
    match next {
        Some(Ok(Frame::Close(reason))) => Err(PumpEnd::PeerClosed(reason)),
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(PumpEnd::ReadFailed(e)),
        None => Err(PumpEnd::ReadEnded),
    }
}
