//! Gateway server loop.
//!
//! # Responsibilities
//! - Pull admitted connections from the admission-controlled listener
//! - Run the TLS handshake per connection, abandoning it on eviction
//! - Mark connections active once the handshake completes and serve HTTP
//! - On shutdown: stop accepting, close pending connections, drain active ones

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ConnectInfo,
    http::Request,
    routing::get,
    Router,
};
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tower::Service;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admission::AdmissionController;
use crate::config::GatewayConfig;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{AdmissionListener, AdmissionTicket, ListenerError, RawAcceptor, SocketConfigurer};
use crate::observability::metrics::{self, HandshakeOutcome};

/// Errors that stop the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// TLS-terminating gateway front end.
pub struct GatewayServer {
    config: GatewayConfig,
    controller: Arc<AdmissionController>,
    tracker: ConnectionTracker,
    app: Router,
}

impl GatewayServer {
    /// Create a new server with the given configuration and admission state.
    pub fn new(config: GatewayConfig, controller: Arc<AdmissionController>, tracker: ConnectionTracker) -> Self {
        let app = Self::build_router(&config);
        Self {
            config,
            controller,
            tracker,
            app,
        }
    }

    /// Replace the application router connections are handed to.
    pub fn with_app(mut self, app: Router) -> Self {
        self.app = app;
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run until the shutdown signal fires.
    pub async fn run<A, C>(
        self,
        listener: AdmissionListener<A, C>,
        tls: Option<RustlsAcceptor>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError>
    where
        A: RawAcceptor,
        A::Stream: AsyncRead + AsyncWrite + Unpin,
        C: SocketConfigurer<A::Stream>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = tls.is_some(),
            "Gateway server starting"
        );

        let sampler = self.controller.spawn_sampler(shutdown.resubscribe());

        loop {
            tokio::select! {
                (stream, peer, ticket) = listener.accept() => {
                    let app = self.app.clone();
                    let tls = tls.clone();
                    tokio::spawn(handle_connection(stream, peer, ticket, tls, app));
                }
                _ = shutdown.recv() => {
                    tracing::info!("Gateway stopped accepting");
                    break;
                }
            }
        }

        drop(listener);
        self.controller.shutdown();
        let _ = sampler.await;

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !self.tracker.wait_idle(grace).await {
            tracing::warn!(
                open = self.tracker.open_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        tracing::info!("Gateway server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ticket: AdmissionTicket,
    tls: Option<RustlsAcceptor>,
    app: Router,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(acceptor) = tls else {
        if ticket.activate() {
            serve_connection(TokioIo::new(stream), peer, app).await;
        }
        return;
    };

    let handshake = tokio::select! {
        result = acceptor.accept(stream, ()) => result,
        _ = ticket.evicted() => {
            metrics::record_handshake(HandshakeOutcome::Evicted);
            tracing::debug!(connection_id = %ticket.id(), peer_addr = %peer, "Handshake abandoned: evicted");
            return;
        }
    };

    match handshake {
        Ok((tls_stream, ())) => {
            if !ticket.activate() {
                metrics::record_handshake(HandshakeOutcome::Evicted);
                return;
            }
            metrics::record_handshake(HandshakeOutcome::Completed);
            tracing::debug!(connection_id = %ticket.id(), peer_addr = %peer, "Handshake completed");
            serve_connection(TokioIo::new(tls_stream), peer, app).await;
        }
        Err(e) => {
            metrics::record_handshake(HandshakeOutcome::Failed);
            tracing::debug!(connection_id = %ticket.id(), peer_addr = %peer, error = %e, "Handshake failed");
        }
    }
}

async fn serve_connection<I>(io: TokioIo<I>, peer: SocketAddr, app: Router)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        app.clone().call(request)
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
    }
}
