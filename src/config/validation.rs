//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratios, batch sizes, timeouts)
//! - Validate addresses of every enabled endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on reload

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AdmissionConfig, GatewayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("{field}: must not be empty")]
    Empty { field: &'static str },
}

fn out_of_range(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        reason: reason.into(),
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Validate the admission section alone (used by hot reload too).
pub fn validate_admission(config: &AdmissionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let high = config.high_water_ratio;
    if !(high > 0.0 && high <= 1.0) {
        errors.push(out_of_range("admission.high_water_ratio", "must be in (0, 1]"));
    }
    if let Some(low) = config.low_water_ratio {
        if !(0.0..=1.0).contains(&low) {
            errors.push(out_of_range("admission.low_water_ratio", "must be in [0, 1]"));
        } else if low > high {
            errors.push(out_of_range(
                "admission.low_water_ratio",
                "must not exceed admission.high_water_ratio",
            ));
        }
    }
    if config.max_batch == 0 {
        errors.push(out_of_range("admission.max_batch", "must be at least 1"));
    }
    if !(config.eviction_factor.is_finite() && config.eviction_factor >= 1.0) {
        errors.push(out_of_range("admission.eviction_factor", "must be a finite number >= 1"));
    }
    if config.sample_interval_ms == 0 {
        errors.push(out_of_range("admission.sample_interval_ms", "must be greater than 0"));
    }

    errors
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(out_of_range("listener.max_connections", "must be at least 1"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::Empty {
                field: "listener.tls.cert_path",
            });
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::Empty {
                field: "listener.tls.key_path",
            });
        }
    }

    errors.extend(validate_admission(&config.admission));

    if config.timeouts.handshake_secs == 0 {
        errors.push(out_of_range("timeouts.handshake_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(out_of_range("timeouts.request_secs", "must be greater than 0"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(out_of_range(
            "observability.log_format",
            format!("unknown format {other:?}, expected \"pretty\" or \"json\""),
        )),
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::Empty { field: "admin.api_key" });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
