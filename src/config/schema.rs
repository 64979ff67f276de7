//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.
//! Every field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NetConfig {
    /// Listener configuration (bind address, TLS, handle budget).
    pub listener: ListenerConfig,

    /// Endpoint resolution settings.
    pub resolver: ResolverConfig,

    /// Bounded shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5672").
    pub bind_address: String,

    /// Optional TLS configuration. When present every accepted connection
    /// is a TLS socket.
    pub tls: Option<TlsConfig>,

    /// Size of the file handle budget shared by all connections.
    pub max_connections: usize,

    /// How long an accepted connection gets to complete its TLS handshake,
    /// in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5672".to_string(),
            tls: None,
            max_connections: 10_000,
            handshake_timeout_ms: 10_000,
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

/// Endpoint resolution configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Replace literal addresses with reverse-DNS hostnames in socket ends
    /// and connection strings.
    pub reverse_dns_lookups: bool,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long `fast_close` lets a TLS close handshake run, in milliseconds.
    pub fast_close_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn fast_close_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_close_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            fast_close_timeout_ms: 5000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
