//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Metrics → Admission controller → Listener
//!     → TLS acceptor → Admin API → Config watcher → Gateway loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close pending → Drain active → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Accepting starts last (traffic only when ready)
//! - Shutdown has a grace deadline for active connections

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
