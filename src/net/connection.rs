//! Connection identity, lifecycle states and open-connection tracking.
//!
//! # Responsibilities
//! - Identify connections for the admission registry and for tracing
//! - Define the lifecycle a connection goes through before the HTTP layer owns it
//! - Count every open connection (pending and active) for resource sampling
//!   and graceful shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a connection.
///
/// Ids are handed out by the admission controller that owns them, so two
/// listeners in the same process never share a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic id source owned by one admission controller.
#[derive(Debug, Default)]
pub struct ConnectionIdSource {
    next: AtomicU64,
}

impl ConnectionIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new unique connection ID.
    pub fn next_id(&self) -> ConnectionId {
        // Relaxed is enough, only uniqueness matters.
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of an accepted connection.
///
/// ```text
/// Registered → Configuring → Handshaking → Active
///      └────────────┴─────────────┴──────→ Closed
/// ```
///
/// Only `Registered`, `Configuring` and `Handshaking` connections live in the
/// admission registry and can be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Accepted, not yet configured.
    Registered,
    /// Socket options being applied.
    Configuring,
    /// Configured, TLS handshake in progress.
    Handshaking,
    /// Handed to TLS/HTTP processing.
    Active,
    /// Terminal: completed, closed by peer or evicted.
    Closed,
}

impl ConnectionState {
    /// Whether a connection in this state is still waiting for the
    /// application layer (and therefore may be evicted).
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ConnectionState::Registered | ConnectionState::Configuring | ConnectionState::Handshaking
        )
    }

    /// Whether reaching this state takes the connection out of the registry.
    pub fn is_terminal_for_registry(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::Closed)
    }
}

/// Tracks every open connection, pending or active.
///
/// Feeds the connection-slot resource monitor and lets shutdown wait for
/// in-flight connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open_count: Arc::clone(&self.open_count),
            id,
        }
    }

    /// Get current open connection count.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or the deadline passes.
    ///
    /// Returns `true` when the count reached zero.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let wait = async {
            while self.open_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    open_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
