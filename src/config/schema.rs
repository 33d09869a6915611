//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::monitor::Thresholds;
use crate::admission::policy::EvictionPolicy;

/// Root configuration for the gateway listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Admission control (eviction under resource pressure).
    pub admission: AdmissionConfig,

    /// Options applied to every accepted socket.
    pub socket: SocketConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Management endpoint settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Optional TLS configuration. Plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Connection slots budget, sampled as a pressure resource.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Which resource drives the pressure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Open file descriptors against `RLIMIT_NOFILE`.
    FileDescriptors,
    /// Open connections against `listener.max_connections`.
    Connections,
    /// Whichever of the two is more exhausted.
    All,
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Enable eviction. Connections are still tracked when disabled.
    pub enabled: bool,

    /// Resource to sample.
    pub resource: ResourceKind,

    /// Start evicting above this fraction of capacity.
    pub high_water_ratio: f64,

    /// Stop evicting at or below this fraction. Binary pressure when absent.
    pub low_water_ratio: Option<f64>,

    /// Maximum connections closed per check.
    pub max_batch: usize,

    /// Evictions per unit of usage above the high-water mark.
    pub eviction_factor: f64,

    /// How long a resource sample stays valid, and the period of the
    /// background eviction check.
    pub sample_interval_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resource: ResourceKind::All,
            high_water_ratio: 0.9,
            low_water_ratio: Some(0.8),
            max_batch: 16,
            eviction_factor: 1.0,
            sample_interval_ms: 250,
        }
    }
}

impl AdmissionConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high_water: self.high_water_ratio,
            low_water: self.low_water_ratio,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.max_batch, self.eviction_factor)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Socket options applied right after accept.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,

    /// IP time-to-live.
    pub ttl: Option<u32>,

    /// SO_RCVBUF in bytes.
    pub recv_buffer_size: Option<usize>,

    /// SO_SNDBUF in bytes.
    pub send_buffer_size: Option<usize>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TLS handshake timeout in seconds.
    pub handshake_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// How long shutdown waits for active connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 10,
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder admin key. Startup warns when it is still in use.
pub const DEFAULT_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Management endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin endpoint.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin endpoint bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: DEFAULT_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8443");
        assert_eq!(config.admission, AdmissionConfig::default());
    }

    #[test]
    fn admission_section_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [admission]
            resource = "file_descriptors"
            high_water_ratio = 0.8
            max_batch = 3
            eviction_factor = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.admission.resource, ResourceKind::FileDescriptors);
        assert_eq!(config.admission.max_batch, 3);
        // Not overridden: default low-water mark stays.
        assert_eq!(config.admission.low_water_ratio, Some(0.8));
        assert_eq!(config.admission.policy(), EvictionPolicy::new(3, 2.0));
    }
}
