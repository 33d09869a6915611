//! Registry of accepted connections that the application has not picked up yet.
//!
//! # Responsibilities
//! - Record every accepted-but-unserviced connection with its accept time
//! - Track lifecycle state changes racing with eviction and closure
//! - Hand out the oldest evictable connections in a deterministic order
//!
//! # Design Decisions
//! - `DashMap` keyed by id for per-connection operations, plus an ordered
//!   index of `(accepted_at, id)` behind a short-lived mutex
//! - No lock is held while a socket is closed
//! - A record is present iff its socket is open and not yet active; reaching
//!   `Active` or `Closed` removes it
//! - Index entries whose record vanished in a register/remove race are pruned
//!   lazily by [`ConnectionRegistry::oldest`]

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::net::connection::{ConnectionId, ConnectionState};

/// The closable resource behind a registered connection.
///
/// Closing must be idempotent: a connection may be closed by eviction while
/// its owner is closing it too.
pub trait SocketHandle: Send + Sync {
    fn close(&self) -> io::Result<()>;
}

/// Errors returned by the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The id is already registered. Indicates broken id allocation.
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

struct Record {
    accepted_at: Instant,
    state: ConnectionState,
    handle: Arc<dyn SocketHandle>,
}

/// Snapshot of a registry record.
#[derive(Clone)]
pub struct RecordHandle {
    pub id: ConnectionId,
    pub accepted_at: Instant,
    pub state: ConnectionState,
    handle: Arc<dyn SocketHandle>,
}

impl RecordHandle {
    fn of(id: ConnectionId, record: &Record) -> Self {
        Self {
            id,
            accepted_at: record.accepted_at,
            state: record.state,
            handle: Arc::clone(&record.handle),
        }
    }

    /// Close the underlying socket.
    pub fn close(&self) -> io::Result<()> {
        self.handle.close()
    }
}

impl std::fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordHandle")
            .field("id", &self.id)
            .field("accepted_at", &self.accepted_at)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Concurrent, time-ordered registry of pending connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    records: DashMap<ConnectionId, Record>,
    order: Mutex<BTreeSet<(Instant, ConnectionId)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection accepted now.
    pub fn register(
        &self,
        id: ConnectionId,
        handle: Arc<dyn SocketHandle>,
    ) -> Result<RecordHandle, RegistryError> {
        self.register_at(id, Instant::now(), handle)
    }

    /// Register a connection with an explicit accept time.
    pub fn register_at(
        &self,
        id: ConnectionId,
        accepted_at: Instant,
        handle: Arc<dyn SocketHandle>,
    ) -> Result<RecordHandle, RegistryError> {
        let snapshot = match self.records.entry(id) {
            Entry::Occupied(_) => {
                tracing::error!(connection_id = %id, "Duplicate connection registration");
                return Err(RegistryError::Duplicate(id));
            }
            Entry::Vacant(vacant) => {
                let record = Record {
                    accepted_at,
                    state: ConnectionState::Registered,
                    handle,
                };
                let snapshot = RecordHandle::of(id, &record);
                vacant.insert(record);
                snapshot
            }
        };

        self.order.lock().insert((accepted_at, id));
        Ok(snapshot)
    }

    /// Move a pending connection to a new state.
    ///
    /// Returns `false` when the id is absent or no longer pending (evicted or
    /// closed concurrently); that race is expected and only logged. Moving to
    /// `Active` or `Closed` removes the record.
    pub fn transition(&self, id: ConnectionId, state: ConnectionState) -> bool {
        {
            let Some(mut record) = self.records.get_mut(&id) else {
                tracing::debug!(connection_id = %id, ?state, "Transition for unknown connection ignored");
                return false;
            };
            if !record.state.is_pending() {
                tracing::debug!(
                    connection_id = %id,
                    from = ?record.state,
                    to = ?state,
                    "Transition for closing connection ignored"
                );
                return false;
            }
            record.state = state;
            if !state.is_terminal_for_registry() {
                return true;
            }
        }

        self.remove(id);
        true
    }

    /// Remove a connection. Returns the record the first time only.
    pub fn remove(&self, id: ConnectionId) -> Option<RecordHandle> {
        let (_, record) = self.records.remove(&id)?;
        self.order.lock().remove(&(record.accepted_at, id));
        Some(RecordHandle::of(id, &record))
    }

    /// Mark a pending connection as being evicted.
    ///
    /// Succeeds at most once per id and never for an active connection.
    pub fn claim(&self, id: ConnectionId) -> Option<RecordHandle> {
        let mut record = self.records.get_mut(&id)?;
        if !record.state.is_pending() {
            return None;
        }
        record.state = ConnectionState::Closed;
        Some(RecordHandle::of(id, &record))
    }

    /// Up to `k` oldest pending connections, ordered by `(accepted_at, id)`.
    pub fn oldest(&self, k: usize, exclude: Option<ConnectionId>) -> Vec<RecordHandle> {
        let mut selected = Vec::with_capacity(k.min(64));
        if k == 0 {
            return selected;
        }

        let mut order = self.order.lock();
        let mut stale = Vec::new();

        for key @ &(accepted_at, id) in order.iter() {
            if selected.len() == k {
                break;
            }
            match self.records.get(&id) {
                Some(record) if record.accepted_at == accepted_at => {
                    if record.state.is_pending() && Some(id) != exclude {
                        selected.push(RecordHandle::of(id, &record));
                    }
                }
                _ => stale.push(*key),
            }
        }

        for key in stale {
            order.remove(&key);
        }

        selected
    }

    /// Snapshot of one record.
    pub fn get(&self, id: ConnectionId) -> Option<RecordHandle> {
        self.records.get(&id).map(|r| RecordHandle::of(id, &r))
    }

    /// Number of registered connections.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Claim every pending connection, oldest first.
    pub fn drain(&self) -> Vec<RecordHandle> {
        self.oldest(usize::MAX, None)
            .into_iter()
            .filter_map(|r| self.claim(r.id))
            .collect()
    }
}
