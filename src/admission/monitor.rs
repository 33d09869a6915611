//! Resource pressure sampling.
//!
//! # Responsibilities
//! - Read how much of a bounded resource (file descriptors, connection slots)
//!   is in use
//! - Turn raw usage into a pressure signal with high/low water marks
//!
//! # Design Decisions
//! - Monitors never block and have no effect outside themselves
//! - A monitor that cannot read its counter returns an error; callers treat
//!   that as "unknown" and do not evict (fail open)
//! - Hysteresis lives in [`PressureGauge`], not in the monitors

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::net::connection::ConnectionTracker;

/// Errors that can occur while sampling a resource.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The OS counter could not be read.
    #[error("failed to read resource counter: {0}")]
    Io(#[from] io::Error),

    /// The resource has no finite capacity, so pressure is meaningless.
    #[error("resource capacity is unbounded")]
    Unbounded,

    /// This monitor is not supported on the current platform.
    #[error("resource monitor not supported on this platform")]
    Unsupported,

    /// The counter is temporarily unavailable.
    #[error("resource counter unavailable: {0}")]
    Unavailable(String),
}

/// Raw reading of a bounded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    pub used: u64,
    pub capacity: u64,
}

impl ResourceUsage {
    pub fn new(used: u64, capacity: u64) -> Self {
        Self { used, capacity }
    }

    /// Fraction of the capacity in use (0 when capacity is 0).
    pub fn ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used as f64 / self.capacity as f64
        }
    }
}

/// A pressure-annotated snapshot of the monitored resource.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ResourceSample {
    pub used_count: u64,
    pub capacity: u64,
    /// Usage count above which eviction starts.
    pub high_water_mark: u64,
    pub is_under_pressure: bool,
}

impl ResourceSample {
    pub fn pressure_ratio(&self) -> f64 {
        ResourceUsage::new(self.used_count, self.capacity).ratio()
    }

    /// A reading of a resource known to be exhausted.
    pub fn saturated(capacity: u64, thresholds: &Thresholds) -> Self {
        Self {
            used_count: capacity,
            capacity,
            high_water_mark: Thresholds::mark(thresholds.high_water, capacity),
            is_under_pressure: true,
        }
    }

    /// How many units the usage exceeds the high-water mark by.
    pub fn excess(&self) -> u64 {
        self.used_count.saturating_sub(self.high_water_mark)
    }
}

/// A source of resource usage readings.
pub trait ResourceMonitor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Read current usage. Must not block.
    fn sample(&self) -> Result<ResourceUsage, MonitorError>;
}

/// Water marks expressed as fractions of capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high_water: f64,
    pub low_water: Option<f64>,
}

impl Thresholds {
    fn mark(ratio: f64, capacity: u64) -> u64 {
        (ratio * capacity as f64).round() as u64
    }
}

/// Converts usage readings into pressure samples, remembering the previous
/// verdict for hysteresis.
///
/// With a low-water mark, pressure starts once usage exceeds the high mark and
/// only ends when usage falls to the low mark or below. Without one, pressure
/// is simply `used > high mark`.
#[derive(Debug, Default)]
pub struct PressureGauge {
    under_pressure: AtomicBool,
}

impl PressureGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate a reading with the pressure verdict.
    pub fn assess(&self, usage: ResourceUsage, thresholds: &Thresholds) -> ResourceSample {
        let high_water_mark = Thresholds::mark(thresholds.high_water, usage.capacity);

        let is_under_pressure = if usage.capacity == 0 {
            false
        } else {
            match thresholds.low_water {
                Some(low) if self.under_pressure.load(Ordering::Relaxed) => {
                    usage.used > Thresholds::mark(low, usage.capacity)
                }
                _ => usage.used > high_water_mark,
            }
        };

        let was = self.under_pressure.swap(is_under_pressure, Ordering::Relaxed);
        if was != is_under_pressure {
            tracing::info!(
                used = usage.used,
                capacity = usage.capacity,
                under_pressure = is_under_pressure,
                "Resource pressure changed"
            );
        }

        ResourceSample {
            used_count: usage.used,
            capacity: usage.capacity,
            high_water_mark,
            is_under_pressure,
        }
    }

    /// Forget the previous verdict.
    pub fn reset(&self) {
        self.under_pressure.store(false, Ordering::Relaxed);
    }
}

/// Open file descriptors of this process against the soft `RLIMIT_NOFILE`.
///
/// Counting needs a descriptor of its own, which is unavailable exactly when
/// the table is full. The monitor therefore holds one reserve descriptor and
/// gives it up for the duration of each count.
#[derive(Debug)]
pub struct FileDescriptorMonitor {
    /// Overrides the rlimit-derived capacity when set.
    capacity: Option<u64>,
    reserve: Mutex<Option<std::fs::File>>,
}

impl Default for FileDescriptorMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDescriptorMonitor {
    pub fn new() -> Self {
        Self {
            capacity: None,
            reserve: Mutex::new(Self::open_reserve()),
        }
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    #[cfg(target_os = "linux")]
    fn open_reserve() -> Option<std::fs::File> {
        match std::fs::File::open("/dev/null") {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::debug!(error = %e, "Reserve descriptor unavailable");
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn open_reserve() -> Option<std::fs::File> {
        None
    }

    #[cfg(target_os = "linux")]
    fn open_descriptors(&self) -> Result<u64, MonitorError> {
        let mut reserve = self.reserve.lock();
        drop(reserve.take());

        let counted = Self::count_fd_entries();

        if reserve.is_none() {
            *reserve = Self::open_reserve();
        }
        // The reserve was closed while counting but is ours all the same.
        Ok(counted? + u64::from(reserve.is_some()))
    }

    #[cfg(target_os = "linux")]
    fn count_fd_entries() -> Result<u64, MonitorError> {
        let entries = std::fs::read_dir("/proc/self/fd")?;
        // read_dir holds one descriptor of its own while iterating.
        let count = entries.count() as u64;
        Ok(count.saturating_sub(1))
    }

    #[cfg(not(target_os = "linux"))]
    fn open_descriptors(&self) -> Result<u64, MonitorError> {
        Err(MonitorError::Unsupported)
    }

    #[cfg(unix)]
    fn soft_limit() -> Result<u64, MonitorError> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: getrlimit only writes into the struct we pass in.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
        if rc != 0 {
            return Err(MonitorError::Io(io::Error::last_os_error()));
        }
        if limit.rlim_cur == libc::RLIM_INFINITY {
            return Err(MonitorError::Unbounded);
        }
        Ok(limit.rlim_cur as u64)
    }

    #[cfg(not(unix))]
    fn soft_limit() -> Result<u64, MonitorError> {
        Err(MonitorError::Unsupported)
    }
}

impl ResourceMonitor for FileDescriptorMonitor {
    fn name(&self) -> &str {
        "file_descriptors"
    }

    fn sample(&self) -> Result<ResourceUsage, MonitorError> {
        let capacity = match self.capacity {
            Some(capacity) => capacity,
            None => Self::soft_limit()?,
        };
        let used = self.open_descriptors()?;
        Ok(ResourceUsage::new(used, capacity))
    }
}

/// Open connections (pending and active) against the listener's slot budget.
#[derive(Debug, Clone)]
pub struct ConnectionCountMonitor {
    tracker: ConnectionTracker,
    capacity: u64,
}

impl ConnectionCountMonitor {
    pub fn new(tracker: ConnectionTracker, capacity: u64) -> Self {
        Self { tracker, capacity }
    }
}

impl ResourceMonitor for ConnectionCountMonitor {
    fn name(&self) -> &str {
        "connection_slots"
    }

    fn sample(&self) -> Result<ResourceUsage, MonitorError> {
        Ok(ResourceUsage::new(self.tracker.open_count(), self.capacity))
    }
}

/// Reports whichever component resource is most exhausted.
///
/// Components that fail are skipped; the composite only fails when every
/// component does.
pub struct CompositeMonitor {
    monitors: Vec<Arc<dyn ResourceMonitor>>,
}

impl CompositeMonitor {
    pub fn new(monitors: Vec<Arc<dyn ResourceMonitor>>) -> Self {
        Self { monitors }
    }
}

impl ResourceMonitor for CompositeMonitor {
    fn name(&self) -> &str {
        "composite"
    }

    fn sample(&self) -> Result<ResourceUsage, MonitorError> {
        let mut worst: Option<ResourceUsage> = None;
        let mut last_error = None;

        for monitor in &self.monitors {
            match monitor.sample() {
                Ok(usage) => {
                    if worst.map_or(true, |w| usage.ratio() > w.ratio()) {
                        worst = Some(usage);
                    }
                }
                Err(e) => {
                    tracing::trace!(monitor = monitor.name(), error = %e, "Component monitor failed");
                    last_error = Some(e);
                }
            }
        }

        match (worst, last_error) {
            (Some(usage), _) => Ok(usage),
            (None, Some(e)) => Err(e),
            (None, None) => Err(MonitorError::Unavailable("no monitors configured".into())),
        }
    }
}

/// A monitor whose readings are set by hand.
#[derive(Debug, Default)]
pub struct ManualMonitor {
    used: AtomicU64,
    capacity: AtomicU64,
    failing: AtomicBool,
}

impl ManualMonitor {
    pub fn new(used: u64, capacity: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            capacity: AtomicU64::new(capacity),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, used: u64, capacity: u64) {
        self.used.store(used, Ordering::SeqCst);
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Make subsequent samples fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ResourceMonitor for ManualMonitor {
    fn name(&self) -> &str {
        "manual"
    }

    fn sample(&self) -> Result<ResourceUsage, MonitorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Unavailable("manual monitor set to fail".into()));
        }
        Ok(ResourceUsage::new(
            self.used.load(Ordering::SeqCst),
            self.capacity.load(Ordering::SeqCst),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;

    const BINARY: Thresholds = Thresholds {
        high_water: 0.8,
        low_water: None,
    };

    const HYSTERESIS: Thresholds = Thresholds {
        high_water: 0.8,
        low_water: Some(0.6),
    };

    #[test]
    fn binary_pressure_above_high_mark() {
        let gauge = PressureGauge::new();
        let sample = gauge.assess(ResourceUsage::new(95, 100), &BINARY);
        assert!(sample.is_under_pressure);
        assert_eq!(sample.high_water_mark, 80);
        assert_eq!(sample.excess(), 15);
        assert!((sample.pressure_ratio() - 0.95).abs() < f64::EPSILON);

        let sample = gauge.assess(ResourceUsage::new(80, 100), &BINARY);
        assert!(!sample.is_under_pressure, "at the mark is not above it");
    }

    #[test]
    fn hysteresis_holds_pressure_until_low_mark() {
        let gauge = PressureGauge::new();

        assert!(!gauge.assess(ResourceUsage::new(70, 100), &HYSTERESIS).is_under_pressure);
        assert!(gauge.assess(ResourceUsage::new(85, 100), &HYSTERESIS).is_under_pressure);
        // Between the marks: keeps evicting.
        assert!(gauge.assess(ResourceUsage::new(70, 100), &HYSTERESIS).is_under_pressure);
        assert!(!gauge.assess(ResourceUsage::new(60, 100), &HYSTERESIS).is_under_pressure);
        // Between the marks again, coming from below: no pressure.
        assert!(!gauge.assess(ResourceUsage::new(70, 100), &HYSTERESIS).is_under_pressure);
    }

    #[test]
    fn zero_capacity_is_never_pressure() {
        let gauge = PressureGauge::new();
        let sample = gauge.assess(ResourceUsage::new(10, 0), &BINARY);
        assert!(!sample.is_under_pressure);
        assert_eq!(sample.pressure_ratio(), 0.0);
    }

    #[test]
    fn manual_monitor_can_fail() {
        let monitor = ManualMonitor::new(1, 10);
        assert_eq!(monitor.sample().unwrap(), ResourceUsage::new(1, 10));
        monitor.set_failing(true);
        assert!(monitor.sample().is_err());
        monitor.set_failing(false);
        monitor.set(5, 10);
        assert_eq!(monitor.sample().unwrap().used, 5);
    }

    #[test]
    fn composite_reports_worst_component() {
        let a: Arc<dyn ResourceMonitor> = Arc::new(ManualMonitor::new(10, 100));
        let b: Arc<dyn ResourceMonitor> = Arc::new(ManualMonitor::new(9, 10));
        let composite = CompositeMonitor::new(vec![a, b]);
        assert_eq!(composite.sample().unwrap(), ResourceUsage::new(9, 10));
    }

    #[test]
    fn composite_skips_failing_components() {
        let failing = ManualMonitor::new(0, 0);
        failing.set_failing(true);
        let ok: Arc<dyn ResourceMonitor> = Arc::new(ManualMonitor::new(3, 10));
        let composite = CompositeMonitor::new(vec![Arc::new(failing), ok]);
        assert_eq!(composite.sample().unwrap(), ResourceUsage::new(3, 10));
    }

    #[test]
    fn composite_fails_when_all_fail() {
        let failing = ManualMonitor::new(0, 0);
        failing.set_failing(true);
        let composite = CompositeMonitor::new(vec![Arc::new(failing)]);
        assert!(composite.sample().is_err());
        assert!(CompositeMonitor::new(Vec::new()).sample().is_err());
    }

    #[test]
    fn connection_count_follows_tracker() {
        let tracker = ConnectionTracker::new();
        let monitor = ConnectionCountMonitor::new(tracker.clone(), 4);
        let _g = tracker.track(ConnectionId::from(1));
        assert_eq!(monitor.sample().unwrap(), ResourceUsage::new(1, 4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn file_descriptor_monitor_reads_proc() {
        let monitor = FileDescriptorMonitor::with_capacity(1_000_000);
        let usage = monitor.sample().unwrap();
        assert!(usage.used > 0);
        assert_eq!(usage.capacity, 1_000_000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn file_descriptor_monitor_keeps_its_reserve() {
        let monitor = FileDescriptorMonitor::with_capacity(1_000_000);
        assert!(monitor.reserve.lock().is_some());
        monitor.sample().unwrap();
        monitor.sample().unwrap();
        assert!(monitor.reserve.lock().is_some());
    }

    #[test]
    fn saturated_sample_is_full_and_under_pressure() {
        let sample = ResourceSample::saturated(
            50,
            &Thresholds {
                high_water: 0.9,
                low_water: None,
            },
        );
        assert_eq!(sample.used_count, 50);
        assert_eq!(sample.high_water_mark, 45);
        assert_eq!(sample.excess(), 5);
        assert!(sample.is_under_pressure);
    }
}
