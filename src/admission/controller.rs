//! Admission controller: registry, pressure and eviction glued together.
//!
//! # Data Flow
//! ```text
//! admit(handle)
//!     → registry.register(id)
//!     → run_eviction_pass(exclude = id)
//!         → current_sample()   (cached for sample_interval)
//!         → policy.decide()
//!         → registry.oldest() → claim() → close() → remove()
//!
//! endpoint closed / handshake done
//!     → notify_closed(id) / activate(id)
//! ```
//!
//! Eviction claims a record before closing it, so an owner reporting the
//! closure of an evicted connection is never counted as a second removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::admission::monitor::{PressureGauge, ResourceMonitor, ResourceSample, ResourceUsage};
use crate::admission::registry::{ConnectionRegistry, RegistryError, SocketHandle};
use crate::config::AdmissionConfig;
use crate::net::connection::{ConnectionId, ConnectionIdSource, ConnectionState};
use crate::observability::logging::LogThrottle;
use crate::observability::metrics;

const MONITOR_FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Batch size the policy asked for.
    pub requested: usize,
    /// Connections actually evicted, oldest first.
    pub evicted: Vec<ConnectionId>,
    /// Closes that returned an error (the connection is still evicted).
    pub close_failures: usize,
}

/// Read-only view of the admission layer for the management surface.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub enabled: bool,
    pub registry_size: usize,
    pub pressure_ratio: Option<f64>,
    pub under_pressure: bool,
    pub last_eviction_batch: usize,
    pub last_eviction_unix_ms: Option<u64>,
    pub total_registered: u64,
    pub total_evicted: u64,
    /// Pending connections closed by their owner, evictions excluded.
    pub total_closed: u64,
    pub close_failures: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedSample {
    taken_at: Instant,
    sample: Option<ResourceSample>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastEviction {
    batch: usize,
    unix_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    evicted: AtomicU64,
    closed: AtomicU64,
    close_failures: AtomicU64,
}

/// Owns the connection registry of one listener and evicts the oldest pending
/// connections when the monitored resource runs short.
pub struct AdmissionController {
    registry: ConnectionRegistry,
    monitor: Arc<dyn ResourceMonitor>,
    gauge: PressureGauge,
    config: ArcSwap<AdmissionConfig>,
    ids: ConnectionIdSource,
    cached: Mutex<Option<CachedSample>>,
    last_eviction: Mutex<LastEviction>,
    counters: Counters,
    /// Capacity from the last successful sample, 0 if none yet.
    last_capacity: AtomicU64,
    monitor_failures: LogThrottle,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, monitor: Arc<dyn ResourceMonitor>) -> Self {
        tracing::info!(
            enabled = config.enabled,
            monitor = monitor.name(),
            high_water_ratio = config.high_water_ratio,
            low_water_ratio = ?config.low_water_ratio,
            max_batch = config.max_batch,
            "Admission control initialized"
        );

        Self {
            registry: ConnectionRegistry::new(),
            monitor,
            gauge: PressureGauge::new(),
            config: ArcSwap::from_pointee(config),
            ids: ConnectionIdSource::new(),
            cached: Mutex::new(None),
            last_eviction: Mutex::new(LastEviction::default()),
            counters: Counters::default(),
            last_capacity: AtomicU64::new(0),
            monitor_failures: LogThrottle::new(MONITOR_FAILURE_LOG_INTERVAL),
        }
    }

    /// Current tuning.
    pub fn config(&self) -> Arc<AdmissionConfig> {
        self.config.load_full()
    }

    /// Swap tuning at runtime. The cached sample and the hysteresis verdict
    /// are dropped so new marks apply from scratch on the next check.
    pub fn update_config(&self, config: AdmissionConfig) {
        tracing::info!(
            enabled = config.enabled,
            high_water_ratio = config.high_water_ratio,
            low_water_ratio = ?config.low_water_ratio,
            max_batch = config.max_batch,
            eviction_factor = config.eviction_factor,
            "Admission configuration updated"
        );
        self.config.store(Arc::new(config));
        self.gauge.reset();
        *self.cached.lock() = None;
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a freshly accepted connection, then make room if needed.
    ///
    /// The new connection is never a candidate in its own eviction pass.
    pub fn admit(&self, handle: Arc<dyn SocketHandle>) -> Result<ConnectionId, RegistryError> {
        let id = self.ids.next_id();
        self.registry.register(id, handle)?;
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        metrics::record_accepted();
        metrics::set_pending(self.registry.size());

        self.run_eviction_pass(Some(id));
        Ok(id)
    }

    /// Record a lifecycle step of a pending connection.
    pub fn transition(&self, id: ConnectionId, state: ConnectionState) -> bool {
        if state.is_terminal_for_registry() {
            let moved = self.registry.transition(id, state);
            metrics::set_pending(self.registry.size());
            return moved;
        }
        self.registry.transition(id, state)
    }

    /// The connection was handed to the application layer.
    ///
    /// Returns `false` if it was evicted first.
    pub fn activate(&self, id: ConnectionId) -> bool {
        self.transition(id, ConnectionState::Active)
    }

    /// The endpoint closed (peer disconnect, handshake failure or completion).
    ///
    /// Idempotent. Returns `true` only when this call removed a pending
    /// connection; a connection already claimed by eviction is removed but
    /// reported as `false`.
    pub fn notify_closed(&self, id: ConnectionId) -> bool {
        let Some(record) = self.registry.remove(id) else {
            return false;
        };
        metrics::set_pending(self.registry.size());
        if record.state == ConnectionState::Closed {
            return false;
        }
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(connection_id = %id, "Pending connection closed");
        true
    }

    /// Latest pressure sample, reusing the cached one while it is fresh.
    ///
    /// `None` means the resource could not be read.
    pub fn current_sample(&self) -> Option<ResourceSample> {
        let interval = self.config.load().sample_interval();
        if let Some(cached) = *self.cached.lock() {
            if cached.taken_at.elapsed() < interval {
                return cached.sample;
            }
        }
        self.refresh_sample()
    }

    /// Take a new sample from the monitor.
    pub fn refresh_sample(&self) -> Option<ResourceSample> {
        let thresholds = self.config.load().thresholds();

        let sample = match self.monitor.sample() {
            Ok(usage) => {
                self.last_capacity.store(usage.capacity, Ordering::Relaxed);
                let sample = self.gauge.assess(usage, &thresholds);
                metrics::set_pressure_ratio(sample.pressure_ratio());
                Some(sample)
            }
            Err(e) => {
                metrics::record_monitor_failure();
                if let Some(suppressed) = self.monitor_failures.check() {
                    tracing::warn!(
                        monitor = self.monitor.name(),
                        error = %e,
                        suppressed,
                        "Resource sample unavailable, not evicting"
                    );
                }
                None
            }
        };

        *self.cached.lock() = Some(CachedSample {
            taken_at: Instant::now(),
            sample,
        });
        sample
    }

    /// Evict the oldest pending connections if the resource is under pressure.
    ///
    /// The cached sample is discounted by the evicted count, so passes that
    /// reuse it before the next sample only make up the remaining excess.
    pub fn run_eviction_pass(&self, exclude: Option<ConnectionId>) -> EvictionReport {
        let config = self.config.load();
        if !config.enabled {
            return EvictionReport::default();
        }

        let sample = self.current_sample();
        let report = self.evict(&config, sample, exclude);
        if !report.evicted.is_empty() {
            self.discount_cached(report.evicted.len(), &config);
        }
        report
    }

    /// Evict as if the resource were fully used, without consulting the
    /// monitor.
    ///
    /// For when the process has just been refused a resource (EMFILE on
    /// accept): sampling may itself fail at that point. Capacity comes from
    /// the last good sample, or the registry size if there was none.
    pub fn run_eviction_pass_saturated(&self, exclude: Option<ConnectionId>) -> EvictionReport {
        let config = self.config.load();
        if !config.enabled {
            return EvictionReport::default();
        }

        let capacity = match self.last_capacity.load(Ordering::Relaxed) {
            0 => self.registry.size() as u64,
            known => known,
        };
        let sample = ResourceSample::saturated(capacity, &config.thresholds());
        self.evict(&config, Some(sample), exclude)
    }

    fn evict(
        &self,
        config: &AdmissionConfig,
        sample: Option<ResourceSample>,
        exclude: Option<ConnectionId>,
    ) -> EvictionReport {
        let requested = config.policy().decide(sample.as_ref(), self.registry.size());
        if requested == 0 {
            return EvictionReport::default();
        }

        let mut report = EvictionReport {
            requested,
            ..EvictionReport::default()
        };

        for candidate in self.registry.oldest(requested, exclude) {
            // Lost a race with activation, closure or another eviction pass.
            let Some(record) = self.registry.claim(candidate.id) else {
                continue;
            };

            if let Err(e) = record.close() {
                report.close_failures += 1;
                self.counters.close_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_close_failure();
                tracing::warn!(connection_id = %record.id, error = %e, "Failed to close evicted connection");
            }
            self.registry.remove(record.id);
            report.evicted.push(record.id);
        }

        if !report.evicted.is_empty() {
            metrics::set_pending(self.registry.size());
            let evicted = report.evicted.len();
            self.counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::record_evictions(evicted);
            *self.last_eviction.lock() = LastEviction {
                batch: evicted,
                unix_ms: unix_millis(),
            };

            tracing::warn!(
                evicted,
                requested,
                used = sample.map(|s| s.used_count),
                capacity = sample.map(|s| s.capacity),
                remaining = self.registry.size(),
                "Evicted oldest pending connections under resource pressure"
            );
        }

        report
    }

    /// Lower the cached usage by connections just evicted.
    fn discount_cached(&self, evicted: usize, config: &AdmissionConfig) {
        let mut cached = self.cached.lock();
        let Some(entry) = cached.as_mut() else {
            return;
        };
        if let Some(sample) = entry.sample {
            let usage = ResourceUsage::new(sample.used_count.saturating_sub(evicted as u64), sample.capacity);
            entry.sample = Some(self.gauge.assess(usage, &config.thresholds()));
        }
    }

    /// Force-close every pending connection. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let drained = self.registry.drain();
        for record in &drained {
            if let Err(e) = record.close() {
                tracing::debug!(connection_id = %record.id, error = %e, "Close at shutdown failed");
            }
            self.registry.remove(record.id);
        }
        metrics::set_pending(self.registry.size());
        tracing::info!(closed = drained.len(), "Pending connections closed at shutdown");
        drained.len()
    }

    /// Observability snapshot.
    pub fn stats(&self) -> AdmissionStats {
        let cached = (*self.cached.lock()).and_then(|c| c.sample);
        let last = *self.last_eviction.lock();
        AdmissionStats {
            enabled: self.config.load().enabled,
            registry_size: self.registry.size(),
            pressure_ratio: cached.map(|s| s.pressure_ratio()),
            under_pressure: cached.is_some_and(|s| s.is_under_pressure),
            last_eviction_batch: last.batch,
            last_eviction_unix_ms: last.unix_ms,
            total_registered: self.counters.registered.load(Ordering::Relaxed),
            total_evicted: self.counters.evicted.load(Ordering::Relaxed),
            total_closed: self.counters.closed.load(Ordering::Relaxed),
            close_failures: self.counters.close_failures.load(Ordering::Relaxed),
        }
    }

    /// Re-sample and run an eviction pass every `sample_interval` until
    /// shutdown, so stalled connections are reclaimed even when no new
    /// connection arrives.
    pub fn spawn_sampler(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = controller.config.load().sample_interval().max(Duration::from_millis(10));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        controller.refresh_sample();
                        controller.run_eviction_pass(None);
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Admission sampler stopping");
                        break;
                    }
                }
            }
        })
    }
}

fn unix_millis() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}
