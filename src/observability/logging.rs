//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Bound the frequency of repetitive warnings (log storms under attack)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("edge_gate={},tower_http=info", config.log_level)));

    match config.log_format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

const NEVER: u64 = u64::MAX;

/// Lets one log line through per interval and counts the rest.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    origin: Instant,
    last_emit_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: Instant::now(),
            last_emit_ms: AtomicU64::new(NEVER),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed)` when the caller should log now, with the
    /// number of events swallowed since the previous emitted line.
    pub fn check(&self) -> Option<u64> {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        let last = self.last_emit_ms.load(Ordering::Relaxed);

        if last != NEVER && now_ms.saturating_sub(last) < self.interval.as_millis() as u64 {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self
            .last_emit_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => Some(self.suppressed.swap(0, Ordering::Relaxed)),
            Err(_) => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_is_logged() {
        let throttle = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.check(), Some(0));
    }

    #[test]
    fn events_within_interval_are_suppressed() {
        let throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.check().is_some());
        assert!(throttle.check().is_none());
        assert!(throttle.check().is_none());
        assert_eq!(throttle.suppressed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn next_window_reports_suppressed_count() {
        let throttle = LogThrottle::new(Duration::from_millis(20));
        assert!(throttle.check().is_some());
        assert!(throttle.check().is_none());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(throttle.check(), Some(1));
    }
}
