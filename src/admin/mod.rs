//! Management API.
//!
//! Read-only views of the admission layer, served on a separate listener and
//! guarded by a bearer key.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::admission::AdmissionController;
use crate::net::connection::ConnectionTracker;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub controller: Arc<AdmissionController>,
    pub tracker: ConnectionTracker,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/admission", get(get_admission))
        .route("/admin/connections", get(get_connections))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn spawn_admin_server(
    addr: SocketAddr,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = setup_admin_router(state);
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin API stopped with error");
        }
    }))
}
