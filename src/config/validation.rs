//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, budget > 0)
//! - Check addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NetConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::NetConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check `config` and collect every problem found.
pub fn validate_config(config: &NetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }
    if config.listener.handshake_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "listener.handshake_timeout_ms",
            "must be greater than 0",
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new(
                "listener.tls.cert_path",
                "must not be empty",
            ));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new(
                "listener.tls.key_path",
                "must not be empty",
            ));
        }
    }
    if config.shutdown.fast_close_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "shutdown.fast_close_timeout_ms",
            "must be greater than 0",
        ));
    }
    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
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
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&NetConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = NetConfig::default();
        config.listener.bind_address = "localhost".into();
        config.listener.max_connections = 0;
        config.listener.handshake_timeout_ms = 0;
        config.listener.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });
        config.shutdown.fast_close_timeout_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "listener.handshake_timeout_ms",
                "listener.tls.cert_path",
                "shutdown.fast_close_timeout_ms",
            ]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = NetConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }
}
