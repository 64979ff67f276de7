//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, then TLS handshake in the connection's task)
//!     → accept.rs (ack, buffer tuning, file handle budget)
//!     → socket.rs (one operation set over plain.rs / tls_socket.rs)
//!     → Hand off to connection logic
//!
//! Teardown:
//!     shutdown.rs (bounded close, descriptor always released)
//!
//! Diagnostics:
//!     ends.rs (direction-aware endpoints, connection strings)
//!     loopback.rs (loopback classification)
//! ```
//!
//! # Design Decisions
//! - Plain and TLS sockets are variants of one enum, never trait objects
//! - Every socket owns a duplicate of its raw descriptor for options,
//!   addresses and abrupt close
//! - Completion events go to a bounded channel owned by the socket's owner

pub mod accept;
pub mod budget;
pub mod connector;
pub mod ends;
pub mod event;
pub mod listener;
pub mod loopback;
pub mod options;
pub mod plain;
mod raw;
pub mod shutdown;
pub mod socket;
pub mod stats;
pub mod tls;
pub mod tls_socket;

pub use accept::{accept_ack, AcceptAck, AcceptOutcome, AcceptRef};
pub use budget::{FileHandleBudget, HandleBudget, HandlePermit};
pub use ends::{Direction, EndpointResolver, Host, ReverseDns, SocketEnds, SystemDns};
pub use event::{event_channel, EventReceiver, EventSender, RecvToken, SocketEvent, SocketId};
pub use listener::{Handoff, Listener, ListenerError, DEFAULT_HANDSHAKE_TIMEOUT};
pub use loopback::{is_loopback, Loopback};
pub use options::{SockOpt, SockOptName};
pub use shutdown::DEFAULT_FAST_CLOSE_TIMEOUT;
pub use socket::{PeerCert, Received, Socket, SocketOps};
pub use stats::{Stat, StatsSnapshot};
pub use tls_socket::TlsInfo;
