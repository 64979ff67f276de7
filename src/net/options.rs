//! Socket options understood by `getopts`/`setopts`.

use std::time::Duration;

/// Option selector for `getopts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockOptName {
    /// Kernel send buffer (`SO_SNDBUF`).
    SendBuffer,
    /// Kernel receive buffer (`SO_RCVBUF`).
    RecvBuffer,
    /// Size of the user-level buffer used by `recv`.
    Buffer,
    /// `TCP_NODELAY`.
    NoDelay,
    /// `SO_KEEPALIVE`.
    KeepAlive,
    /// `SO_LINGER`.
    Linger,
}

/// Option value, as returned by `getopts` and accepted by `setopts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOpt {
    SendBuffer(usize),
    RecvBuffer(usize),
    Buffer(usize),
    NoDelay(bool),
    KeepAlive(bool),
    Linger(Option<Duration>),
}

impl SockOpt {
    /// The selector this value answers.
    pub fn name(&self) -> SockOptName {
        match self {
            SockOpt::SendBuffer(_) => SockOptName::SendBuffer,
            SockOpt::RecvBuffer(_) => SockOptName::RecvBuffer,
            SockOpt::Buffer(_) => SockOptName::Buffer,
            SockOpt::NoDelay(_) => SockOptName::NoDelay,
            SockOpt::KeepAlive(_) => SockOptName::KeepAlive,
            SockOpt::Linger(_) => SockOptName::Linger,
        }
    }

    /// Numeric value of a buffer option; `None` for the others.
    pub fn buffer_size(&self) -> Option<usize> {
        match *self {
            SockOpt::SendBuffer(n) | SockOpt::RecvBuffer(n) | SockOpt::Buffer(n) => Some(n),
            _ => None,
        }
    }
}
