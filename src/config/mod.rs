//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → NetConfig (validated, immutable)
//!     → sections handed to listener, resolver, shutdown, observability
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup and never changes afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, NetConfig, ObservabilityConfig, ResolverConfig, ShutdownConfig, TlsConfig,
};
