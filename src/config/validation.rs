//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, intervals)
//! - Detect listeners that would collide on the same port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashMap;

use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("port {port} is used by both {first} and {second}")]
    PortConflict {
        port: u16,
        first: &'static str,
        second: &'static str,
    },

    #[error("invalid log level: {0}")]
    LogLevel(String),

    #[error("refresh interval {field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("invalid CORS origin: {0}")]
    CorsOrigin(String),

    #[error("host.address is not a valid host: {0}")]
    HostAddress(String),
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.name.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "host.name" });
    }
    if config.host.address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "host.address" });
    } else if url::Host::parse(&config.host.address).is_err() {
        errors.push(ValidationError::HostAddress(config.host.address.clone()));
    }
    if config.controller.address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "controller.address" });
    }

    // Port 0 asks the OS for an ephemeral port and never collides.
    let ports = [
        ("http.port", config.http.port),
        ("http.port_tls", config.http.port_tls),
        ("pubsub.port", config.pubsub.port),
        ("pubsub.port_tls", config.pubsub.port_tls),
        ("binrpc.port", config.binrpc.port),
    ];
    let mut seen: HashMap<u16, &'static str> = HashMap::new();
    for (field, port) in ports {
        if port == 0 {
            continue;
        }
        if let Some(first) = seen.insert(port, field) {
            errors.push(ValidationError::PortConflict {
                port,
                first,
                second: field,
            });
        }
    }

    if config.logging.level.parse::<LevelFilter>().is_err() {
        errors.push(ValidationError::LogLevel(config.logging.level.clone()));
    }

    let intervals = [
        ("refresh.sysvar_secs", config.refresh.sysvar_secs),
        ("refresh.program_secs", config.refresh.program_secs),
        ("refresh.explorer_secs", config.refresh.explorer_secs),
        ("refresh.device_secs", config.refresh.device_secs),
    ];
    for (field, secs) in intervals {
        if secs == 0 {
            errors.push(ValidationError::ZeroInterval { field });
        }
    }

    for origin in &config.http.cors_origins {
        if origin == "*" || axum::http::HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::CorsOrigin(origin.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = GatewayConfig::default();
        config.host.name = String::new();
        config.pubsub.port = config.http.port;
        config.logging.level = "loud".to_string();
        config.http.cors_origins = vec!["*".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::PortConflict {
            port: 2121,
            first: "http.port",
            second: "pubsub.port",
        }));
    }

    #[test]
    fn ephemeral_ports_never_conflict() {
        let mut config = GatewayConfig::default();
        config.http.port = 0;
        config.http.port_tls = 0;
        config.pubsub.port = 0;
        assert_eq!(validate_config(&config), Ok(()));
    }
}
