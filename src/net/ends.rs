//! Endpoint resolution.
//!
//! # Responsibilities
//! - Orient a socket's local/peer addresses by connection direction
//! - Optionally replace literal addresses with reverse-DNS hostnames
//! - Render the `"from:port -> to:port"` connection string used in logs
//!
//! # Design Decisions
//! - The reverse-lookup switch is read once, when the resolver is built
//! - Lookups that fail fall back to the literal address, never to an error

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::net::socket::{Socket, SocketOps};

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We accepted it: from = peer, to = local.
    Inbound,
    /// We initiated it: from = local, to = peer.
    Outbound,
}

/// An endpoint host: a literal address or a resolved hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Addr(IpAddr),
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Addr(ip) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// Direction-oriented endpoints of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEnds {
    pub from_host: Host,
    pub from_port: u16,
    pub to_host: Host,
    pub to_port: u16,
}

impl fmt::Display for SocketEnds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.from_host, self.from_port, self.to_host, self.to_port
        )
    }
}

/// Reverse DNS lookups.
#[async_trait]
pub trait ReverseDns: Send + Sync {
    /// Hostname for `ip`. Implementations fall back to the literal address
    /// rather than failing.
    async fn resolve(&self, ip: IpAddr) -> String;
}

/// Reverse lookups through the system resolver, run on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDns;

#[async_trait]
impl ReverseDns for SystemDns {
    async fn resolve(&self, ip: IpAddr) -> String {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
        match lookup.await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                tracing::debug!(address = %ip, error = %e, "Reverse lookup failed");
                ip.to_string()
            }
            Err(e) => {
                tracing::debug!(address = %ip, error = %e, "Reverse lookup task failed");
                ip.to_string()
            }
        }
    }
}

/// Computes socket ends and connection strings.
#[derive(Clone)]
pub struct EndpointResolver {
    reverse_lookups: bool,
    dns: Arc<dyn ReverseDns>,
}

impl EndpointResolver {
    /// Resolver using the system DNS.
    pub fn new(config: &ResolverConfig) -> Self {
        Self::with_dns(config, Arc::new(SystemDns))
    }

    pub fn with_dns(config: &ResolverConfig, dns: Arc<dyn ReverseDns>) -> Self {
        Self {
            reverse_lookups: config.reverse_dns_lookups,
            dns,
        }
    }

    pub fn reverse_lookups(&self) -> bool {
        self.reverse_lookups
    }

    /// Endpoints oriented by `direction`. Both addresses are queried; when
    /// both fail, the "from" side's error is returned.
    pub async fn socket_ends(&self, socket: &Socket, direction: Direction) -> Result<SocketEnds> {
        let (from, to) = orient(direction, socket.sockname(), socket.peername())?;
        Ok(SocketEnds {
            from_host: self.host(from.ip()).await,
            from_port: from.port(),
            to_host: self.host(to.ip()).await,
            to_port: to.port(),
        })
    }

    /// `"<from>:<port> -> <to>:<port>"` for the socket.
    pub async fn connection_string(&self, socket: &Socket, direction: Direction) -> Result<String> {
        Ok(self.socket_ends(socket, direction).await?.to_string())
    }

    async fn host(&self, ip: IpAddr) -> Host {
        if self.reverse_lookups {
            Host::Name(self.dns.resolve(ip).await)
        } else {
            Host::Addr(ip)
        }
    }
}

/// Order the local and peer address lookups as (from, to). The "from"
/// side's error is checked first.
fn orient(
    direction: Direction,
    local: Result<SocketAddr>,
    peer: Result<SocketAddr>,
) -> Result<(SocketAddr, SocketAddr)> {
    let (from, to) = match direction {
        Direction::Inbound => (peer, local),
        Direction::Outbound => (local, peer),
    };
    Ok((from?, to?))
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("reverse_lookups", &self.reverse_lookups)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io;

    fn not_connected() -> Result<SocketAddr> {
        Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected)))
    }

    #[test]
    fn from_side_error_wins() {
        let inbound = orient(Direction::Inbound, Err(Error::Closed), not_connected());
        match inbound {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("expected the peer lookup error, got {other:?}"),
        }

        let outbound = orient(Direction::Outbound, Err(Error::Closed), not_connected());
        assert!(matches!(outbound, Err(Error::Closed)));
    }

    #[test]
    fn one_failing_side_fails_the_lookup() {
        let addr: SocketAddr = "127.0.0.1:5672".parse().unwrap();
        assert!(matches!(
            orient(Direction::Outbound, Ok(addr), not_connected()),
            Err(Error::Io(_))
        ));
        let both = orient(Direction::Inbound, Ok(addr), Ok(addr)).unwrap();
        assert_eq!(both, (addr, addr));
    }

    #[test]
    fn connection_string_format() {
        let ends = SocketEnds {
            from_host: Host::Addr("1.2.3.4".parse().unwrap()),
            from_port: 5000,
            to_host: Host::Addr("9.9.9.9".parse().unwrap()),
            to_port: 80,
        };
        assert_eq!(ends.to_string(), "1.2.3.4:5000 -> 9.9.9.9:80");
    }

    #[test]
    fn hostnames_render_as_is() {
        let ends = SocketEnds {
            from_host: Host::Name("client.example".into()),
            from_port: 41000,
            to_host: Host::Addr("::1".parse().unwrap()),
            to_port: 5671,
        };
        assert_eq!(ends.to_string(), "client.example:41000 -> ::1:5671");
    }
}
