//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission, listener and gateway produce:
//!     → logging.rs (structured log events, throttled where repetitive)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ids appear as a `connection_id` field on every per-connection event
//! - Metrics are atomic increments, no-ops without an installed recorder

pub mod logging;
pub mod metrics;
