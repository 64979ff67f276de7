//! The socket handle and the operation set shared by both transports.
//!
//! # Responsibilities
//! - Define [`SocketOps`], the single operation set connection logic uses
//! - Route every operation to the plain or TLS implementation
//! - Hold the per-socket state both variants share (options, counters, owner)
//!
//! # Design Decisions
//! - The variant is fixed when the handle is built; dispatch is a `match`
//! - Each transport keeps its own error and completion semantics, the facade
//!   only makes them callable through one name

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::net::event::{EventSender, Owner, RecvToken, SocketId};
use crate::net::options::{SockOpt, SockOptName};
use crate::net::plain::PlainSocket;
use crate::net::raw::RawSocket;
use crate::net::stats::{SocketStats, Stat, StatsSnapshot};
use crate::net::tls_socket::{TlsInfo, TlsSocket};

/// Initial size of the user-level receive buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Result of a blocking `recv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Data(Vec<u8>),
    /// The peer closed its side of the connection.
    Closed,
}

/// Peer certificate, or the sentinel for transports that have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCert {
    /// Plaintext sockets never carry a certificate.
    NoTls,
    /// DER encoding of the peer's end-entity certificate.
    Der(CertificateDer<'static>),
}

/// Operations available on every socket handle.
///
/// Results and errors are those of the transport that implements the call.
/// The completion-event operations (`async_recv`, `send_nowait`) post to the
/// owner registered with [`SocketOps::controlling_process`].
#[async_trait]
pub trait SocketOps: Send + Sync {
    /// Process-unique id of this handle.
    fn id(&self) -> SocketId;

    /// True for TLS sockets. Never fails.
    fn is_tls(&self) -> bool;

    fn getopts(&self, names: &[SockOptName]) -> Result<Vec<SockOpt>>;

    fn setopts(&self, opts: &[SockOpt]) -> Result<()>;

    /// Snapshot of the requested traffic counters.
    fn getstat(&self, stats: &[Stat]) -> Result<StatsSnapshot>;

    /// Wait for the next chunk of data, at most `Buffer` bytes.
    async fn recv(&self) -> Result<Received>;

    /// Read exactly `len` bytes, or whatever is available when `len` is 0.
    async fn sync_recv(&self, len: usize) -> Result<Vec<u8>>;

    /// Request `len` bytes without waiting. The data arrives later as a
    /// `SocketEvent::Recv` carrying the returned token. `None` waits forever.
    fn async_recv(&self, len: usize, timeout: Option<Duration>) -> Result<RecvToken>;

    /// Write all of `data` and flush it.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Fire-and-forget send. Completion arrives as `SocketEvent::SendReply`.
    ///
    /// Callers must handle both failure paths: an error returned here, and an
    /// error carried by the later event. Which one a given failure takes
    /// depends on the transport.
    async fn send_nowait(&self, data: Vec<u8>) -> Result<()>;

    /// Graceful close, performing the transport's closing handshake.
    async fn close(&self) -> Result<()>;

    fn sockname(&self) -> Result<SocketAddr>;

    fn peername(&self) -> Result<SocketAddr>;

    fn peercert(&self) -> Result<PeerCert>;

    /// Hand the socket's events to a different owner.
    fn controlling_process(&self, owner: EventSender) -> Result<()>;
}

/// A connected socket, either plaintext or TLS.
#[derive(Debug)]
pub enum Socket {
    Plain(PlainSocket),
    Tls(TlsSocket),
}

impl Socket {
    /// Wrap an accepted or connected TCP stream.
    pub fn plain(stream: TcpStream) -> Result<Self> {
        Ok(Socket::Plain(PlainSocket::new(stream)?))
    }

    /// Wrap a stream that has completed its TLS handshake.
    pub fn tls(stream: tokio_rustls::TlsStream<TcpStream>) -> Result<Self> {
        Ok(Socket::Tls(TlsSocket::new(stream)?))
    }

    /// Negotiated protocol and cipher suite; `None` for plaintext sockets.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        match self {
            Socket::Plain(_) => None,
            Socket::Tls(s) => Some(s.info()),
        }
    }

    /// Abrupt close of the underlying descriptor, no handshake.
    pub(crate) fn abort(&self) {
        match self {
            Socket::Plain(s) => s.abort(),
            Socket::Tls(s) => s.abort(),
        }
    }
}

#[async_trait]
impl SocketOps for Socket {
    fn id(&self) -> SocketId {
        match self {
            Socket::Plain(s) => s.id(),
            Socket::Tls(s) => s.id(),
        }
    }

    fn is_tls(&self) -> bool {
        matches!(self, Socket::Tls(_))
    }

    fn getopts(&self, names: &[SockOptName]) -> Result<Vec<SockOpt>> {
        match self {
            Socket::Plain(s) => s.getopts(names),
            Socket::Tls(s) => s.getopts(names),
        }
    }

    fn setopts(&self, opts: &[SockOpt]) -> Result<()> {
        match self {
            Socket::Plain(s) => s.setopts(opts),
            Socket::Tls(s) => s.setopts(opts),
        }
    }

    fn getstat(&self, stats: &[Stat]) -> Result<StatsSnapshot> {
        match self {
            Socket::Plain(s) => s.getstat(stats),
            Socket::Tls(s) => s.getstat(stats),
        }
    }

    async fn recv(&self) -> Result<Received> {
        match self {
            Socket::Plain(s) => s.recv().await,
            Socket::Tls(s) => s.recv().await,
        }
    }

    async fn sync_recv(&self, len: usize) -> Result<Vec<u8>> {
        match self {
            Socket::Plain(s) => s.sync_recv(len).await,
            Socket::Tls(s) => s.sync_recv(len).await,
        }
    }

    fn async_recv(&self, len: usize, timeout: Option<Duration>) -> Result<RecvToken> {
        match self {
            Socket::Plain(s) => s.async_recv(len, timeout),
            Socket::Tls(s) => s.async_recv(len, timeout),
        }
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        match self {
            Socket::Plain(s) => s.send(data).await,
            Socket::Tls(s) => s.send(data).await,
        }
    }

    async fn send_nowait(&self, data: Vec<u8>) -> Result<()> {
        match self {
            Socket::Plain(s) => s.send_nowait(data).await,
            Socket::Tls(s) => s.send_nowait(data).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Socket::Plain(s) => s.close().await,
            Socket::Tls(s) => s.close().await,
        }
    }

    fn sockname(&self) -> Result<SocketAddr> {
        match self {
            Socket::Plain(s) => s.sockname(),
            Socket::Tls(s) => s.sockname(),
        }
    }

    fn peername(&self) -> Result<SocketAddr> {
        match self {
            Socket::Plain(s) => s.peername(),
            Socket::Tls(s) => s.peername(),
        }
    }

    fn peercert(&self) -> Result<PeerCert> {
        match self {
            Socket::Plain(_) => Ok(PeerCert::NoTls),
            Socket::Tls(s) => s.peercert(),
        }
    }

    fn controlling_process(&self, owner: EventSender) -> Result<()> {
        match self {
            Socket::Plain(s) => s.controlling_process(owner),
            Socket::Tls(s) => s.controlling_process(owner),
        }
    }
}

/// State both socket variants carry next to their stream halves.
#[derive(Debug)]
pub(crate) struct SocketCore {
    pub(crate) id: SocketId,
    pub(crate) raw: RawSocket,
    pub(crate) stats: SocketStats,
    pub(crate) owner: Owner,
    closed: AtomicBool,
    buffer: AtomicUsize,
}

impl SocketCore {
    pub(crate) fn new(raw: RawSocket) -> Self {
        Self {
            id: SocketId::next(),
            raw,
            stats: SocketStats::default(),
            owner: Owner::default(),
            closed: AtomicBool::new(false),
            buffer: AtomicUsize::new(DEFAULT_BUFFER_SIZE),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the socket closed. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn buffer(&self) -> usize {
        self.buffer.load(Ordering::Relaxed)
    }

    pub(crate) fn getopts(&self, names: &[SockOptName]) -> Result<Vec<SockOpt>> {
        self.ensure_open()?;
        names
            .iter()
            .map(|name| {
                Ok(match name {
                    SockOptName::SendBuffer => SockOpt::SendBuffer(self.raw.send_buffer_size()?),
                    SockOptName::RecvBuffer => SockOpt::RecvBuffer(self.raw.recv_buffer_size()?),
                    SockOptName::Buffer => SockOpt::Buffer(self.buffer()),
                    SockOptName::NoDelay => SockOpt::NoDelay(self.raw.nodelay()?),
                    SockOptName::KeepAlive => SockOpt::KeepAlive(self.raw.keepalive()?),
                    SockOptName::Linger => SockOpt::Linger(self.raw.linger()?),
                })
            })
            .collect()
    }

    pub(crate) fn setopts(&self, opts: &[SockOpt]) -> Result<()> {
        self.ensure_open()?;
        for opt in opts {
            match *opt {
                SockOpt::SendBuffer(n) => self.raw.set_send_buffer_size(n)?,
                SockOpt::RecvBuffer(n) => self.raw.set_recv_buffer_size(n)?,
                SockOpt::Buffer(0) => {
                    return Err(Error::InvalidOption("buffer size must be positive".into()))
                }
                SockOpt::Buffer(n) => self.buffer.store(n, Ordering::Relaxed),
                SockOpt::NoDelay(on) => self.raw.set_nodelay(on)?,
                SockOpt::KeepAlive(on) => self.raw.set_keepalive(on)?,
                SockOpt::Linger(linger) => self.raw.set_linger(linger)?,
            }
        }
        Ok(())
    }

    pub(crate) fn getstat(&self, stats: &[Stat]) -> Result<StatsSnapshot> {
        self.ensure_open()?;
        Ok(self.stats.snapshot(stats))
    }

    pub(crate) fn sockname(&self) -> Result<SocketAddr> {
        self.ensure_open()?;
        Ok(self.raw.local_addr()?)
    }

    pub(crate) fn peername(&self) -> Result<SocketAddr> {
        self.ensure_open()?;
        Ok(self.raw.peer_addr()?)
    }

    pub(crate) fn set_owner(&self, owner: EventSender) -> Result<()> {
        self.ensure_open()?;
        self.owner.set(owner)?;
        tracing::trace!(socket_id = %self.id, "Socket ownership transferred");
        Ok(())
    }

    /// One receive of at most `Buffer` bytes.
    pub(crate) async fn read_chunk<R>(&self, reader: &Mutex<ReadBuffer<R>>) -> Result<Received>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_open()?;
        match reader.lock().await.chunk(self.buffer()).await? {
            Some(data) => {
                self.stats.record_recv(data.len());
                Ok(Received::Data(data))
            }
            None => Ok(Received::Closed),
        }
    }

    /// Exactly `len` bytes, or one chunk when `len` is 0. A peer that closes
    /// first yields [`Error::Closed`].
    ///
    /// Cancel-safe: bytes read before the future is dropped stay buffered
    /// for the next receive.
    pub(crate) async fn read_len<R>(
        &self,
        reader: &Mutex<ReadBuffer<R>>,
        len: usize,
    ) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        if len == 0 {
            return match self.read_chunk(reader).await? {
                Received::Data(data) => Ok(data),
                Received::Closed => Err(Error::Closed),
            };
        }
        self.ensure_open()?;
        match reader.lock().await.exact(len).await? {
            Some(data) => {
                self.stats.record_recv(len);
                Ok(data)
            }
            None => Err(Error::Closed),
        }
    }

    pub(crate) async fn write_all<W>(&self, writer: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(data).await?;
        writer.flush().await?;
        self.stats.record_send(data.len());
        Ok(())
    }
}

/// Read half of a stream plus the bytes taken off it but not yet handed
/// out to a receive.
pub(crate) struct ReadBuffer<R> {
    io: R,
    stash: Vec<u8>,
}

impl<R> ReadBuffer<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(io: R) -> Self {
        Self {
            io,
            stash: Vec::new(),
        }
    }

    /// The read half itself, bypassing the stash.
    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.io
    }

    /// Up to `max` bytes: stashed bytes first, otherwise a single read.
    /// `None` on EOF.
    async fn chunk(&mut self, max: usize) -> std::io::Result<Option<Vec<u8>>> {
        if !self.stash.is_empty() {
            let n = max.min(self.stash.len());
            return Ok(Some(self.stash.drain(..n).collect()));
        }
        let mut buf = vec![0u8; max];
        let n = self.io.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    /// Exactly `len` bytes, or `None` if the stream ends first. Each read
    /// lands in the stash before the next await point.
    async fn exact(&mut self, len: usize) -> std::io::Result<Option<Vec<u8>>> {
        while self.stash.len() < len {
            let mut buf = vec![0u8; len - self.stash.len()];
            let n = self.io.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.stash.extend_from_slice(&buf[..n]);
        }
        Ok(Some(self.stash.drain(..len).collect()))
    }
}

/// Run `read` under an optional deadline.
pub(crate) async fn with_deadline<F, T>(timeout: Option<Duration>, read: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .unwrap_or(Err(Error::Timeout)),
        None => read.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_exact_read_keeps_bytes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = ReadBuffer::new(rx);

        tx.write_all(b"abc").await.unwrap();
        let partial = tokio::time::timeout(Duration::from_millis(50), reader.exact(5)).await;
        assert!(partial.is_err());

        tx.write_all(b"de").await.unwrap();
        assert_eq!(reader.exact(5).await.unwrap().unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn chunk_drains_stash_before_reading() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = ReadBuffer::new(rx);

        tx.write_all(b"abc").await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(50), reader.exact(5)).await;

        assert_eq!(reader.chunk(2).await.unwrap().unwrap(), b"ab");
        assert_eq!(reader.chunk(8).await.unwrap().unwrap(), b"c");
        drop(tx);
        assert!(reader.chunk(8).await.unwrap().is_none());
    }
}
