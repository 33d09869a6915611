//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted TCP connection
//!     → server.rs (TLS handshake raced against eviction)
//!     → handshake complete: connection leaves admission accounting
//!     → hyper auto (HTTP/1.1 or HTTP/2) serving the application router
//! ```

pub mod server;

pub use server::{GatewayError, GatewayServer};
