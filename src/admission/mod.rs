//! Admission control for the TLS listener.
//!
//! # Data Flow
//! ```text
//! monitor.rs    sample fd / connection-slot usage → pressure (with hysteresis)
//! registry.rs   accepted-but-unserviced connections, ordered by accept time
//! policy.rs     pressure + registry size → eviction batch size
//! controller.rs admit, evict oldest, close notifications, stats
//! ```
//!
//! Under a slow-handshake flood the listener keeps accepting: the oldest
//! connections that never reached the application layer are force-closed to
//! free descriptors for new ones. Connections already handed to the
//! application are never touched.

pub mod controller;
pub mod monitor;
pub mod policy;
pub mod registry;

pub use controller::{AdmissionController, AdmissionStats, EvictionReport};
pub use monitor::{ResourceMonitor, ResourceSample, ResourceUsage};
pub use policy::EvictionPolicy;
pub use registry::{ConnectionRegistry, RecordHandle, RegistryError, SocketHandle};
