//! TLS sockets.
//!
//! The TLS session has no request/completion primitive of its own, so the
//! completion-event operations are emulated: `async_recv` runs a blocking
//! receive on a helper task and forwards its outcome, and `send_nowait`
//! sends inline then acknowledges with a synthetic event.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsStream;

use crate::error::{Error, Result};
use crate::net::event::{EventSender, RecvToken, SocketEvent, SocketId};
use crate::net::options::{SockOpt, SockOptName};
use crate::net::raw::RawSocket;
use crate::net::socket::{
    with_deadline, PeerCert, ReadBuffer, Received, SocketCore, SocketOps,
};
use crate::net::stats::{Stat, StatsSnapshot};

/// Session parameters negotiated during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    /// Protocol version, e.g. `TLSv1_3`.
    pub protocol: String,
    /// Cipher suite name.
    pub cipher_suite: String,
}

/// A TCP socket carrying a TLS session.
///
/// Owns the raw descriptor alongside the session so a stuck close handshake
/// can be cut short by closing the descriptor directly.
#[derive(Clone)]
pub struct TlsSocket {
    inner: Arc<TlsInner>,
}

struct TlsInner {
    core: SocketCore,
    reader: Mutex<ReadBuffer<ReadHalf<TlsStream<TcpStream>>>>,
    writer: Mutex<WriteHalf<TlsStream<TcpStream>>>,
    peer_cert: Option<CertificateDer<'static>>,
    info: TlsInfo,
}

impl TlsSocket {
    pub fn new(stream: TlsStream<TcpStream>) -> Result<Self> {
        let (tcp, session) = stream.get_ref();
        let raw = RawSocket::duplicate(tcp)?;
        let peer_cert = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .cloned();
        let info = TlsInfo {
            protocol: session
                .protocol_version()
                .map(|v| format!("{v:?}"))
                .unwrap_or_default(),
            cipher_suite: session
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite()))
                .unwrap_or_default(),
        };
        let (reader, writer) = tokio::io::split(stream);
        let inner = TlsInner {
            core: SocketCore::new(raw),
            reader: Mutex::new(ReadBuffer::new(reader)),
            writer: Mutex::new(writer),
            peer_cert,
            info,
        };
        tracing::trace!(
            socket_id = %inner.core.id,
            protocol = %inner.info.protocol,
            cipher_suite = %inner.info.cipher_suite,
            "TLS socket created"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn info(&self) -> &TlsInfo {
        &self.inner.info
    }

    /// Abrupt close of the raw descriptor, bypassing the session.
    pub(crate) fn abort(&self) {
        self.inner.core.mark_closed();
        self.inner.core.raw.abort();
    }

    /// The graceful close procedure: send close_notify, then wait for the
    /// peer's close_notify (or EOF). The wait is unbounded.
    async fn close_handshake(&self) -> Result<()> {
        self.inner.writer.lock().await.shutdown().await?;
        let mut reader = self.inner.reader.lock().await;
        let mut scratch = [0u8; 1024];
        loop {
            match reader.get_mut().read(&mut scratch).await {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                // Peer dropped TCP without its close_notify.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("id", &self.inner.core.id)
            .field("closed", &self.inner.core.is_closed())
            .field("info", &self.inner.info)
            .finish()
    }
}

#[async_trait]
impl SocketOps for TlsSocket {
    fn id(&self) -> SocketId {
        self.inner.core.id
    }

    fn is_tls(&self) -> bool {
        true
    }

    fn getopts(&self, names: &[SockOptName]) -> Result<Vec<SockOpt>> {
        self.inner.core.getopts(names)
    }

    fn setopts(&self, opts: &[SockOpt]) -> Result<()> {
        self.inner.core.setopts(opts)
    }

    fn getstat(&self, stats: &[Stat]) -> Result<StatsSnapshot> {
        self.inner.core.getstat(stats)
    }

    async fn recv(&self) -> Result<Received> {
        self.inner.core.read_chunk(&self.inner.reader).await
    }

    async fn sync_recv(&self, len: usize) -> Result<Vec<u8>> {
        self.inner.core.read_len(&self.inner.reader, len).await
    }

    /// Spawns a helper that performs a blocking `sync_recv` and forwards the
    /// result tagged with the returned token.
    fn async_recv(&self, len: usize, timeout: Option<Duration>) -> Result<RecvToken> {
        self.inner.core.ensure_open()?;
        let token = RecvToken::next();
        let this = self.clone();
        tokio::spawn(async move {
            let result = with_deadline(timeout, this.sync_recv(len)).await;
            let event = SocketEvent::Recv {
                socket: this.inner.core.id,
                token,
                result,
            };
            this.inner.core.owner.deliver(event).await;
        });
        Ok(token)
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.inner.core.ensure_open()?;
        let mut writer = self.inner.writer.lock().await;
        self.inner.core.write_all(&mut *writer, data).await
    }

    /// Sends inline. A failed send is returned here and produces no event;
    /// a successful one is acknowledged with `SendReply(Ok)`.
    async fn send_nowait(&self, data: Vec<u8>) -> Result<()> {
        self.send(&data).await?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let event = SocketEvent::SendReply {
                socket: inner.core.id,
                result: Ok(()),
            };
            inner.core.owner.deliver(event).await;
        });
        Ok(())
    }

    /// Runs the full close handshake, which waits on the peer. Use
    /// `Socket::fast_close` when the peer cannot be trusted to answer.
    async fn close(&self) -> Result<()> {
        if !self.inner.core.mark_closed() {
            return Err(Error::Closed);
        }
        let result = self.close_handshake().await;
        let _ = self.inner.core.raw.shutdown();
        tracing::trace!(socket_id = %self.inner.core.id, ok = result.is_ok(), "TLS socket closed");
        result
    }

    fn sockname(&self) -> Result<SocketAddr> {
        self.inner.core.sockname()
    }

    fn peername(&self) -> Result<SocketAddr> {
        self.inner.core.peername()
    }

    fn peercert(&self) -> Result<PeerCert> {
        self.inner.core.ensure_open()?;
        self.inner
            .peer_cert
            .clone()
            .map(PeerCert::Der)
            .ok_or(Error::NoPeerCertificate)
    }

    fn controlling_process(&self, owner: EventSender) -> Result<()> {
        self.inner.core.set_owner(owner)
    }
}
