//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ServerConfig};
use crate::core::relay::{Session, SessionState, UpstreamConnector};

/// Why a new WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Live view of one registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub created_at: SystemTime,
    pub client_ip: Option<IpAddr>,
    state: watch::Receiver<SessionState>,
}

impl SessionEntry {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Sessions currently handled by this process, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Track a session until the returned registration is dropped.
    pub fn register(&self, session: &Session, client_ip: Option<IpAddr>) -> SessionRegistration {
        let id = session.id().to_string();
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                created_at: session.created_at(),
                client_ip,
                state: session.subscribe(),
            },
        );
        SessionRegistration {
            registry: self.clone(),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered sessions currently in `state`.
    pub fn count_in_state(&self, state: SessionState) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == state)
            .count()
    }
}

/// Removes its session from the registry on drop.
#[derive(Debug)]
pub struct SessionRegistration {
    registry: SessionRegistry,
    id: String,
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.id);
    }
}

/// Application state shared by every request
pub struct AppState {
    pub config: ServerConfig,
    /// Opens upstream connections; holds the credential
    pub upstream: Arc<UpstreamConnector>,
    /// Serialized `session.update` sent to every upstream session
    pub session_frame: Arc<str>,
    pub sessions: SessionRegistry,
    shutdown: CancellationToken,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the shared state. Fails when the upstream settings are unusable,
    /// so no session can ever start without a credential.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ConfigError> {
        let upstream = config
            .upstream
            .connector()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let session_frame = config
            .session
            .to_update_frame()
            .map_err(|e| ConfigError::Invalid(format!("session settings: {e}")))?;

        Ok(Arc::new(Self {
            config,
            upstream: Arc::new(upstream),
            session_frame: Arc::from(session_frame),
            sessions: SessionRegistry::default(),
            shutdown: CancellationToken::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        }))
    }

    /// Token cancelled when the server begins shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal every live session to close.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reserve a WebSocket slot for `ip`, honoring the global and per-IP limits.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if reserved.is_err() {
                drop(per_ip);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *per_ip += 1;
        Ok(())
    }

    /// Return a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

/// Releases a connection slot when dropped.
pub struct ConnectionGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionGuard {
    /// Take ownership of a slot already reserved for `ip`.
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self { state, ip }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
