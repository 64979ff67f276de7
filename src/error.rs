//! Error type shared by every socket operation.
//!
//! Transport failures are carried verbatim in [`Error::Io`]; the remaining
//! variants are conditions this layer detects itself.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type for transport facade operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reported by the underlying TCP or TLS stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket has already been closed.
    #[error("socket is closed")]
    Closed,

    /// An asynchronous receive did not complete before its deadline.
    #[error("receive timed out")]
    Timeout,

    /// Ownership transfer targeted an owner whose receiver is gone.
    #[error("new owner is no longer receiving events")]
    InvalidOwner,

    /// An option value was rejected before reaching the socket.
    #[error("invalid socket option: {0}")]
    InvalidOption(String),

    /// The TLS peer did not present a certificate.
    #[error("peer presented no certificate")]
    NoPeerCertificate,

    /// The listener refused to acknowledge the handoff.
    #[error("accept acknowledgement failed: {0}")]
    AcceptAck(String),

    /// The file handle budget was shut down.
    #[error("file handle budget is closed")]
    BudgetClosed,

    /// TLS configuration or session error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid TLS server name for an outbound connection.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),
}
