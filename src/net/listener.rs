//! TCP listener that hands off plain or TLS sockets.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Take connections off the accept queue as [`Handoff`]s
//! - Track handoffs until connection logic acknowledges or abandons them
//!
//! # Design Decisions
//! - The TLS handshake runs in the connection's own task under a deadline,
//!   so a client that never speaks cannot hold up the accept loop

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::net::accept::{AcceptAck, AcceptRef, PendingHandoffs};
use crate::net::socket::{Socket, SocketOps};
use crate::net::tls::load_server_config;

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Default deadline for an accepted connection's TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
    /// TLS material could not be loaded.
    #[error("Failed to load TLS config: {0}")]
    Tls(Error),
}

/// Accepts connections and hands them to connection logic.
pub struct Listener {
    id: u64,
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    next_handoff: AtomicU64,
    pending: PendingHandoffs,
}

impl Listener {
    /// Bind to the configured address, loading TLS material if configured.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let tls = match &config.tls {
            Some(tls) => Some(
                load_server_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                    .map_err(ListenerError::Tls)?,
            ),
            None => None,
        };
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let listener = Self::from_tcp(listener, tls);
        Ok(listener.with_handshake_timeout(config.handshake_timeout()))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener, tls: Option<Arc<ServerConfig>>) -> Self {
        let listener = Self {
            id: LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            inner,
            tls: tls.map(TlsAcceptor::from),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            next_handoff: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        };
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, tls = listener.is_tls(), "Listener bound");
        }
        listener
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Take the next connection off the accept queue. No bytes are exchanged
    /// here; the TLS handshake, if any, runs in [`Handoff::establish`].
    pub async fn accept(&self) -> Result<Handoff, ListenerError> {
        let (stream, peer_addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let handoff = self.next_handoff.fetch_add(1, Ordering::Relaxed);
        let accept_ref = AcceptRef::tracked(self.id, handoff, Arc::clone(&self.pending));
        tracing::debug!(
            peer_addr = %peer_addr,
            handoff,
            pending = self.pending.len(),
            "Connection accepted"
        );
        Ok(Handoff {
            stream,
            peer_addr,
            tls: self.tls.clone(),
            handshake_timeout: self.handshake_timeout,
            accept_ref,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Handoffs not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl AcceptAck for Listener {
    async fn accept_ack(&self, accept_ref: &AcceptRef) -> Result<()> {
        if accept_ref.listener != self.id {
            return Err(Error::AcceptAck(format!(
                "handoff {} was not made by listener {}",
                accept_ref.handoff, self.id
            )));
        }
        match self.pending.remove(&accept_ref.handoff) {
            Some((_, accepted_at)) => {
                tracing::trace!(
                    handoff = accept_ref.handoff,
                    handoff_us = accepted_at.elapsed().as_micros() as u64,
                    "Handoff acknowledged"
                );
                Ok(())
            }
            None => Err(Error::AcceptAck(format!(
                "handoff {} is not pending",
                accept_ref.handoff
            ))),
        }
    }
}

/// A connection taken off the accept queue whose socket is not built yet.
///
/// Dropping it, or a failed [`establish`](Handoff::establish), withdraws the
/// handoff from the listener.
pub struct Handoff {
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    accept_ref: AcceptRef,
}

impl Handoff {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Build the socket, running the TLS handshake first when the listener
    /// is configured for TLS. A handshake that outlives the listener's
    /// deadline fails with [`Error::Timeout`].
    pub async fn establish(self) -> Result<(Socket, AcceptRef)> {
        let Handoff {
            stream,
            peer_addr,
            tls,
            handshake_timeout,
            accept_ref,
        } = self;
        let socket = match tls {
            None => Socket::plain(stream)?,
            Some(acceptor) => {
                let stream = tokio::time::timeout(handshake_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| {
                        tracing::debug!(peer_addr = %peer_addr, "TLS handshake timed out");
                        Error::Timeout
                    })?
                    .map_err(|e| {
                        tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                        Error::from(e)
                    })?;
                Socket::tls(stream.into())?
            }
        };
        tracing::debug!(
            peer_addr = %peer_addr,
            socket_id = %socket.id(),
            handoff = accept_ref.handoff,
            "Socket established"
        );
        Ok((socket, accept_ref))
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("peer_addr", &self.peer_addr)
            .field("tls", &self.tls.is_some())
            .field("accept_ref", &self.accept_ref)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn plain_listener() -> Listener {
        Listener::from_tcp(TcpListener::bind("127.0.0.1:0").await.unwrap(), None)
    }

    #[tokio::test]
    async fn ack_clears_pending_once() {
        let listener = plain_listener().await;
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();

        let (socket, accept_ref) = listener.accept().await.unwrap().establish().await.unwrap();
        assert!(!socket.is_tls());
        assert_eq!(listener.pending(), 1);

        listener.accept_ack(&accept_ref).await.unwrap();
        assert_eq!(listener.pending(), 0);
        assert!(matches!(
            listener.accept_ack(&accept_ref).await,
            Err(Error::AcceptAck(_))
        ));
    }

    #[tokio::test]
    async fn foreign_ref_is_rejected() {
        let listener = plain_listener().await;
        let foreign = AcceptRef::new(u64::MAX, 1);
        assert!(matches!(
            listener.accept_ack(&foreign).await,
            Err(Error::AcceptAck(_))
        ));
    }

    #[tokio::test]
    async fn abandoned_handoffs_are_withdrawn() {
        let listener = plain_listener().await;
        let addr = listener.local_addr().unwrap();
        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let handoff = listener.accept().await.unwrap();
        assert_eq!(listener.pending(), 1);
        drop(handoff);
        assert_eq!(listener.pending(), 0);

        let (socket, accept_ref) = listener.accept().await.unwrap().establish().await.unwrap();
        assert_eq!(listener.pending(), 1);
        drop(socket);
        drop(accept_ref);
        assert_eq!(listener.pending(), 0);
    }

    #[tokio::test]
    async fn bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            ..ListenerConfig::default()
        };
        let result = Listener::bind(&config).await;
        assert!(matches!(result, Err(ListenerError::Bind(_))));
    }
}
