//! Admission-controlled acceptor.
//!
//! # Responsibilities
//! - Wrap a raw acceptor without changing the stream type it yields
//! - Register every accepted connection before handing it out, running an
//!   eviction pass on the accept path
//! - Apply socket options through the configuration collaborator
//! - Keep accepting through per-connection and transient accept failures
//!
//! # Connection flow
//! ```text
//! raw accept → register (Registered) → eviction pass (excluding self)
//!            → Configuring → configure socket
//!                 ├─ error → dropped (closed), removed
//!                 └─ ok → Handshaking → returned with an AdmissionTicket
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::admission::registry::SocketHandle;
use crate::admission::AdmissionController;
use crate::config::{ListenerConfig, SocketConfig};
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
use crate::observability::metrics;

/// Pause after a failed raw accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The bind address could not be parsed.
    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),

    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),
}

/// The underlying acceptor being wrapped.
pub trait RawAcceptor: Send + Sync {
    type Stream: Send + 'static;

    fn accept_raw(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl RawAcceptor for TcpListener {
    type Stream = TcpStream;

    fn accept_raw(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        self.accept()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Applies per-connection socket options. A failure rejects the connection.
pub trait SocketConfigurer<S>: Send + Sync {
    fn configure(&self, stream: &S) -> io::Result<()>;
}

/// Socket options from [`SocketConfig`] applied to TCP streams.
#[derive(Debug, Clone, Default)]
pub struct TcpSocketOptions {
    config: SocketConfig,
}

impl TcpSocketOptions {
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }
}

impl SocketConfigurer<TcpStream> for TcpSocketOptions {
    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        if let Some(ttl) = self.config.ttl {
            stream.set_ttl(ttl)?;
        }

        let socket = socket2::SockRef::from(stream);
        if let Some(size) = self.config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}

/// Configurer that leaves sockets untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSocketOptions;

impl<S> SocketConfigurer<S> for NoSocketOptions {
    fn configure(&self, _stream: &S) -> io::Result<()> {
        Ok(())
    }
}

/// Registry-side handle of an accepted connection.
///
/// Closing it wakes whoever owns the stream; the owner drops the stream, which
/// closes the socket and reports the closure through its ticket.
#[derive(Debug, Default)]
pub struct EvictionSignal {
    evicted: AtomicBool,
    notify: Notify,
}

impl EvictionSignal {
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been evicted.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_evicted() {
                return;
            }
            notified.await;
        }
    }
}

impl SocketHandle for EvictionSignal {
    fn close(&self) -> io::Result<()> {
        if !self.evicted.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Admission state carried alongside an accepted stream.
///
/// Dropping the ticket reports the endpoint as closed.
pub struct AdmissionTicket {
    id: ConnectionId,
    controller: Arc<AdmissionController>,
    signal: Arc<EvictionSignal>,
    _guard: ConnectionGuard,
}

impl AdmissionTicket {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_evicted(&self) -> bool {
        self.signal.is_evicted()
    }

    /// Resolves when the admission layer evicts this connection.
    pub async fn evicted(&self) {
        self.signal.wait().await
    }

    /// Hand-off to the application layer completed (TLS handshake done).
    ///
    /// Returns `false` if the connection was evicted first; the caller must
    /// then drop it.
    pub fn activate(&self) -> bool {
        self.controller.activate(self.id)
    }

    fn transition(&self, state: ConnectionState) -> bool {
        self.controller.transition(self.id, state)
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("id", &self.id)
            .field("evicted", &self.is_evicted())
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.controller.notify_closed(self.id);
    }
}

/// A listener that registers, configures and (under pressure) evicts.
pub struct AdmissionListener<A, C> {
    inner: A,
    controller: Arc<AdmissionController>,
    configurer: C,
    tracker: ConnectionTracker,
}

impl AdmissionListener<TcpListener, TcpSocketOptions> {
    /// Bind a TCP listener for the configured address.
    pub async fn bind(
        config: &ListenerConfig,
        socket: SocketConfig,
        controller: Arc<AdmissionController>,
        tracker: ConnectionTracker,
    ) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self::new(listener, controller, TcpSocketOptions::new(socket), tracker))
    }
}

impl<A, C> AdmissionListener<A, C>
where
    A: RawAcceptor,
    C: SocketConfigurer<A::Stream>,
{
    pub fn new(
        inner: A,
        controller: Arc<AdmissionController>,
        configurer: C,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            inner,
            controller,
            configurer,
            tracker,
        }
    }

    /// Accept the next connection that survives registration and
    /// configuration.
    ///
    /// Never fails: raw accept errors are logged and retried after a short
    /// pause, and a connection that cannot be configured is closed.
    pub async fn accept(&self) -> (A::Stream, SocketAddr, AdmissionTicket) {
        loop {
            let (stream, peer) = match self.inner.accept_raw().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.on_accept_error(&e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Some(ticket) = self.admit(&stream, peer) {
                return (stream, peer, ticket);
            }
        }
    }

    fn admit(&self, stream: &A::Stream, peer: SocketAddr) -> Option<AdmissionTicket> {
        let signal = Arc::new(EvictionSignal::default());
        let id = match self.controller.admit(signal.clone()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(peer_addr = %peer, error = %e, "Connection registration failed");
                return None;
            }
        };

        let ticket = AdmissionTicket {
            id,
            controller: Arc::clone(&self.controller),
            signal,
            _guard: self.tracker.track(id),
        };

        ticket.transition(ConnectionState::Configuring);
        if let Err(e) = self.configurer.configure(stream) {
            metrics::record_socket_config_failure();
            tracing::warn!(
                connection_id = %id,
                peer_addr = %peer,
                error = %e,
                "Socket configuration failed, closing connection"
            );
            return None;
        }
        ticket.transition(ConnectionState::Handshaking);

        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer,
            pending = self.controller.registry().size(),
            "Connection accepted"
        );
        Some(ticket)
    }

    fn on_accept_error(&self, e: &io::Error) {
        if is_descriptor_exhaustion(e) {
            tracing::warn!(error = %e, "Accept failed: out of file descriptors");
            self.controller.run_eviction_pass_saturated(None);
        } else {
            tracing::debug!(error = %e, "Accept failed");
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_e: &io::Error) -> bool {
    false
}
