//! Configuration file watcher for hot reload.
//!
//! Only the `[admission]` section is applied live; other sections are read at
//! startup and a change to them is logged and ignored until restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::admission::AdmissionController;
use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Config file change detected, reloading");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply reloaded configurations to the admission controller until shutdown.
pub fn spawn_reloader(
    controller: Arc<AdmissionController>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(config) = update else { break };
                    apply_update(&controller, config);
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn apply_update(controller: &AdmissionController, config: GatewayConfig) {
    if *controller.config() == config.admission {
        tracing::debug!("Admission settings unchanged");
        return;
    }
    if controller.config().resource != config.admission.resource {
        tracing::warn!(
            resource = ?config.admission.resource,
            "Changing the monitored resource requires a restart, keeping the current monitor"
        );
    }
    controller.update_config(config.admission);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::monitor::ManualMonitor;
    use crate::config::AdmissionConfig;

    #[tokio::test]
    async fn reloader_applies_admission_section() {
        let controller = Arc::new(AdmissionController::new(
            AdmissionConfig::default(),
            Arc::new(ManualMonitor::new(0, 100)),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_reloader(controller.clone(), rx, shutdown_rx);

        let mut config = GatewayConfig::default();
        config.admission.max_batch = 3;
        config.admission.high_water_ratio = 0.5;
        config.admission.low_water_ratio = None;
        tx.send(config).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while controller.config().max_batch != 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(controller.config().high_water_ratio, 0.5);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
