//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (metrics, admin API, config reload)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The gateway loop starts last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{spawn_admin_server, AdminState};
use crate::admission::monitor::{CompositeMonitor, ConnectionCountMonitor, FileDescriptorMonitor};
use crate::admission::{AdmissionController, ResourceMonitor};
use crate::config::watcher::{spawn_reloader, ConfigWatcher};
use crate::config::{AdmissionConfig, GatewayConfig, ListenerConfig, ResourceKind};
use crate::http::{GatewayError, GatewayServer};
use crate::lifecycle::signals::shutdown_signal;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::AdmissionListener;
use crate::net::tls;
use crate::observability::metrics;

/// Pick the resource monitor named by the admission settings.
pub fn build_monitor(
    admission: &AdmissionConfig,
    listener: &ListenerConfig,
    tracker: &ConnectionTracker,
) -> Arc<dyn ResourceMonitor> {
    let connections = || -> Arc<dyn ResourceMonitor> {
        Arc::new(ConnectionCountMonitor::new(tracker.clone(), listener.max_connections as u64))
    };

    match admission.resource {
        ResourceKind::FileDescriptors => Arc::new(FileDescriptorMonitor::new()),
        ResourceKind::Connections => connections(),
        ResourceKind::All => {
            let descriptors: Arc<dyn ResourceMonitor> = Arc::new(FileDescriptorMonitor::new());
            Arc::new(CompositeMonitor::new(vec![descriptors, connections()]))
        }
    }
}

/// Run the gateway until a shutdown signal arrives.
///
/// `config_path` enables hot reload of the admission settings.
pub async fn run(config: GatewayConfig, config_path: Option<PathBuf>) -> Result<(), GatewayError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let tracker = ConnectionTracker::new();
    let monitor = build_monitor(&config.admission, &config.listener, &tracker);
    let controller = Arc::new(AdmissionController::new(config.admission.clone(), monitor));

    let listener = AdmissionListener::bind(
        &config.listener,
        config.socket.clone(),
        Arc::clone(&controller),
        tracker.clone(),
    )
    .await?;

    let acceptor = match &config.listener.tls {
        Some(tls_config) => {
            let handshake_timeout = Duration::from_secs(config.timeouts.handshake_secs);
            Some(
                tls::build_acceptor(tls_config, handshake_timeout)
                    .await
                    .map_err(GatewayError::Tls)?,
            )
        }
        None => {
            tracing::warn!("No TLS configured, serving plaintext");
            None
        }
    };

    let admin = if config.admin.enabled {
        let addr: SocketAddr = config
            .admin
            .bind_address
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid admin bind address"))?;
        if config.admin.api_key == crate::config::schema::DEFAULT_ADMIN_KEY {
            tracing::warn!("Admin API is using the default key, set admin.api_key");
        }
        let state = AdminState {
            controller: Arc::clone(&controller),
            tracker: tracker.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Some(spawn_admin_server(addr, state, shutdown.subscribe()).await?)
    } else {
        None
    };

    // The notify watcher stops when dropped; keep it until the gateway exits.
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            match watcher.run() {
                Ok(watcher) => {
                    spawn_reloader(Arc::clone(&controller), updates, shutdown.subscribe());
                    Some(watcher)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let server = GatewayServer::new(config, controller, tracker);
    let gateway_shutdown = shutdown.subscribe();

    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        })
    };

    let result = server.run(listener, acceptor, gateway_shutdown).await;
    signal_task.abort();
    // Stops the admin API and reloader when the gateway exited on its own.
    shutdown.trigger();

    if let Some(admin) = admin {
        let _ = admin.await;
    }

    tracing::info!("Shutdown complete");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;

    #[test]
    fn monitor_follows_resource_kind() {
        let tracker = ConnectionTracker::new();
        let listener = ListenerConfig::default();
        let mut admission = AdmissionConfig::default();

        admission.resource = ResourceKind::Connections;
        assert_eq!(build_monitor(&admission, &listener, &tracker).name(), "connection_slots");

        admission.resource = ResourceKind::FileDescriptors;
        assert_eq!(build_monitor(&admission, &listener, &tracker).name(), "file_descriptors");
    }

    #[test]
    fn connection_monitor_uses_listener_capacity() {
        let tracker = ConnectionTracker::new();
        let listener = ListenerConfig {
            max_connections: 4,
            ..ListenerConfig::default()
        };
        let admission = AdmissionConfig {
            resource: ResourceKind::Connections,
            ..AdmissionConfig::default()
        };
        let monitor = build_monitor(&admission, &listener, &tracker);
        let _guard = tracker.track(ConnectionId::from(1u64));
        let usage = monitor.sample().unwrap();
        assert_eq!((usage.used, usage.capacity), (1, 4));
    }
}
