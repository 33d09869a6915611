//! TLS edge gateway with resource-pressure admission control.
//!
//! Accepted connections are tracked from accept until the TLS handshake
//! completes. When the monitored resource (file descriptors or connection
//! slots) crosses its high-water mark, the oldest pending connections are
//! closed to make room.

pub mod admin;
pub mod admission;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use admission::AdmissionController;
pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use net::listener::AdmissionListener;
