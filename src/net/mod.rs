//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (raw accept, admission registration, socket options)
//!     → tls.rs (TLS handshake, raced against eviction)
//!     → connection.rs (ids, lifecycle states, open-connection tracking)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Registered → Configuring → Handshaking → Active
//!                                     └────→ Closed (peer, failure, eviction)
//! ```
//!
//! # Design Decisions
//! - Accept never stops for a single connection's failure
//! - Only connections that have not reached the HTTP layer are evictable
//! - TLS is optional; without it connections are active once configured

pub mod connection;
pub mod listener;
pub mod tls;
