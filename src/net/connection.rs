use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque connection-scoped identifier, also used as the player id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle given to the transport for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Resolves once the registry asks this connection to close
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Client connection information
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub bytes_received: u64,
    pub messages_received: u64,
    close: Arc<Notify>,
    close_requested: bool,
}

impl Connection {
    fn new(id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            created_at: now,
            last_activity: now,
            bytes_received: 0,
            messages_received: 0,
            close: Arc::new(Notify::new()),
            close_requested: false,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record an inbound message
    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
        self.touch();
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Registry errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection limit reached ({0})")]
    Full(usize),
}

/// Tracks every live connection from accept to disconnect
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a newly accepted connection
    pub fn on_connect(
        &self,
        remote_addr: Option<SocketAddr>,
    ) -> Result<ConnectionHandle, RegistryError> {
        let mut connections = self.connections.lock();
        if connections.len() >= self.max_connections {
            return Err(RegistryError::Full(self.max_connections));
        }

        let id = loop {
            let candidate = ConnectionId::new();
            if !connections.contains_key(&candidate) {
                break candidate;
            }
        };

        let conn = Connection::new(id, remote_addr);
        let handle = ConnectionHandle {
            id,
            close: conn.close.clone(),
        };
        connections.insert(id, conn);

        Ok(handle)
    }

    /// Release a connection. Terminal; returns `None` if it was already gone.
    pub fn on_disconnect(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.lock().remove(&id)
    }

    /// Record an inbound message, returns false for unknown connections
    pub fn record_received(&self, id: ConnectionId, bytes: usize) -> bool {
        match self.connections.lock().get_mut(&id) {
            Some(conn) => {
                conn.record_received(bytes);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.lock().get(&id).and_then(|c| c.remote_addr)
    }

    /// Connections idle for longer than `max_idle` and not yet asked to close
    pub fn stale(&self, max_idle: Duration) -> Vec<ConnectionId> {
        self.connections
            .lock()
            .values()
            .filter(|conn| !conn.close_requested && conn.idle_time() > max_idle)
            .map(|conn| conn.id)
            .collect()
    }

    /// Ask a connection's transport task to close.
    /// Returns true only for the first request on a live connection.
    pub fn request_close(&self, id: ConnectionId) -> bool {
        match self.connections.lock().get_mut(&id) {
            Some(conn) if !conn.close_requested => {
                conn.close_requested = true;
                conn.close.notify_one();
                true
            }
            _ => false,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(crate::game::constants::net::DEFAULT_MAX_CONNECTIONS)
    }
}
