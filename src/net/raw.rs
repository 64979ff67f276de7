//! Raw descriptor shared by both socket variants.
//!
//! Each socket keeps a duplicate of its TCP descriptor next to the stream
//! halves. Options, addresses and abrupt close go through the duplicate, so
//! they work while a helper task holds the read half or a TLS session is in
//! the middle of its close handshake.

use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, Socket};
use tokio::net::TcpStream;

/// Duplicate of a connected TCP descriptor.
#[derive(Debug)]
pub(crate) struct RawSocket {
    inner: Socket,
}

impl RawSocket {
    /// Duplicate the descriptor behind `stream`.
    pub(crate) fn duplicate(stream: &TcpStream) -> std::io::Result<Self> {
        let inner = SockRef::from(stream).try_clone()?;
        Ok(Self { inner })
    }

    pub(crate) fn local_addr(&self) -> std::io::Result<SocketAddr> {
        as_inet(self.inner.local_addr()?)
    }

    pub(crate) fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        as_inet(self.inner.peer_addr()?)
    }

    pub(crate) fn send_buffer_size(&self) -> std::io::Result<usize> {
        self.inner.send_buffer_size()
    }

    pub(crate) fn set_send_buffer_size(&self, size: usize) -> std::io::Result<()> {
        self.inner.set_send_buffer_size(size)
    }

    pub(crate) fn recv_buffer_size(&self) -> std::io::Result<usize> {
        self.inner.recv_buffer_size()
    }

    pub(crate) fn set_recv_buffer_size(&self, size: usize) -> std::io::Result<()> {
        self.inner.set_recv_buffer_size(size)
    }

    pub(crate) fn nodelay(&self) -> std::io::Result<bool> {
        self.inner.nodelay()
    }

    pub(crate) fn set_nodelay(&self, enabled: bool) -> std::io::Result<()> {
        self.inner.set_nodelay(enabled)
    }

    pub(crate) fn keepalive(&self) -> std::io::Result<bool> {
        self.inner.keepalive()
    }

    pub(crate) fn set_keepalive(&self, enabled: bool) -> std::io::Result<()> {
        self.inner.set_keepalive(enabled)
    }

    pub(crate) fn linger(&self) -> std::io::Result<Option<Duration>> {
        self.inner.linger()
    }

    pub(crate) fn set_linger(&self, linger: Option<Duration>) -> std::io::Result<()> {
        self.inner.set_linger(linger)
    }

    /// Orderly shutdown of both directions. Pending reads observe EOF.
    pub(crate) fn shutdown(&self) -> std::io::Result<()> {
        self.inner.shutdown(Shutdown::Both)
    }

    /// Abrupt close: zero linger so the kernel drops unsent data, then shut
    /// both directions down. Errors are ignored.
    pub(crate) fn abort(&self) {
        if let Err(e) = self.inner.set_linger(Some(Duration::ZERO)) {
            tracing::trace!(error = %e, "Failed to clear linger before abort");
        }
        if let Err(e) = self.inner.shutdown(Shutdown::Both) {
            tracing::trace!(error = %e, "Abrupt shutdown failed");
        }
    }
}

fn as_inet(addr: socket2::SockAddr) -> std::io::Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "descriptor is not bound to an internet address",
        )
    })
}
