//! Transport facade for a message broker.
//!
//! Connection logic talks to one [`Socket`] type whether the connection is
//! plaintext or TLS. The crate also provides bounded shutdown, endpoint
//! resolution and loopback classification, plus the accept finalization run
//! once per incoming connection.

pub mod config;
pub mod error;
pub mod net;
pub mod observability;

pub use config::NetConfig;
pub use error::{Error, Result};
pub use net::{Direction, EndpointResolver, Socket, SocketOps};
