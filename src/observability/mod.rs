//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Socket operations produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (byte, close and accept counters)
//! ```

pub mod logging;
pub mod metrics;
