//! Loopback address classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::net::socket::{Socket, SocketOps};

/// Values that can be classified as loopback or not. Classification never
/// fails; anything that cannot be resolved counts as not loopback.
pub trait Loopback {
    fn is_loopback(&self) -> bool;
}

/// Free-function form of [`Loopback::is_loopback`].
pub fn is_loopback<T: Loopback + ?Sized>(value: &T) -> bool {
    value.is_loopback()
}

impl Loopback for Ipv4Addr {
    /// The whole 127.0.0.0/8 block.
    fn is_loopback(&self) -> bool {
        self.octets()[0] == 127
    }
}

impl Loopback for Ipv6Addr {
    /// `::1`, or an IPv4-mapped address whose IPv4 part is loopback.
    fn is_loopback(&self) -> bool {
        if *self == Ipv6Addr::LOCALHOST {
            return true;
        }
        match self.to_ipv4_mapped() {
            Some(v4) => Loopback::is_loopback(&v4),
            None => false,
        }
    }
}

impl Loopback for IpAddr {
    fn is_loopback(&self) -> bool {
        match self {
            IpAddr::V4(v4) => Loopback::is_loopback(v4),
            IpAddr::V6(v6) => Loopback::is_loopback(v6),
        }
    }
}

impl Loopback for SocketAddr {
    fn is_loopback(&self) -> bool {
        Loopback::is_loopback(&self.ip())
    }
}

impl Loopback for Socket {
    /// Classifies the local address; false when it cannot be read.
    fn is_loopback(&self) -> bool {
        match self.sockname() {
            Ok(addr) => Loopback::is_loopback(&addr),
            Err(e) => {
                tracing::trace!(socket_id = %self.id(), error = %e, "No local address to classify");
                false
            }
        }
    }
}
