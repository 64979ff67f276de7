//! Plaintext TCP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::net::event::{EventSender, RecvToken, SocketEvent, SocketId};
use crate::net::options::{SockOpt, SockOptName};
use crate::net::raw::RawSocket;
use crate::net::socket::{
    with_deadline, PeerCert, ReadBuffer, Received, SocketCore, SocketOps,
};
use crate::net::stats::{Stat, StatsSnapshot};

/// A TCP socket without encryption.
pub struct PlainSocket {
    inner: Arc<PlainInner>,
}

struct PlainInner {
    core: SocketCore,
    reader: Mutex<ReadBuffer<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl PlainSocket {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let raw = RawSocket::duplicate(&stream)?;
        let (reader, writer) = stream.into_split();
        let inner = PlainInner {
            core: SocketCore::new(raw),
            reader: Mutex::new(ReadBuffer::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        };
        tracing::trace!(socket_id = %inner.core.id, "Plain socket created");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn abort(&self) {
        self.inner.core.mark_closed();
        self.inner.core.raw.abort();
    }
}

impl std::fmt::Debug for PlainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainSocket")
            .field("id", &self.inner.core.id)
            .field("closed", &self.inner.core.is_closed())
            .finish()
    }
}

#[async_trait]
impl SocketOps for PlainSocket {
    fn id(&self) -> SocketId {
        self.inner.core.id
    }

    fn is_tls(&self) -> bool {
        false
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

    /// The read half is natively non-blocking, so the request is simply a
    /// read future polled on its own task.
    fn async_recv(&self, len: usize, timeout: Option<Duration>) -> Result<RecvToken> {
        self.inner.core.ensure_open()?;
        let token = RecvToken::next();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = with_deadline(timeout, inner.core.read_len(&inner.reader, len)).await;
            let event = SocketEvent::Recv {
                socket: inner.core.id,
                token,
                result,
            };
            inner.core.owner.deliver(event).await;
        });
        Ok(token)
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.inner.core.ensure_open()?;
        let mut writer = self.inner.writer.lock().await;
        self.inner.core.write_all(&mut *writer, data).await
    }

    /// Queues the write and returns. Write failures arrive only through the
    /// `SendReply` event; the immediate error is reserved for closed sockets.
    async fn send_nowait(&self, data: Vec<u8>) -> Result<()> {
        self.inner.core.ensure_open()?;
        // Taking the lock before spawning keeps queued writes in call order.
        let mut writer = Arc::clone(&self.inner.writer).lock_owned().await;
        self.inner.core.stats.add_pending(data.len());
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.core.write_all(&mut *writer, &data).await;
            drop(writer);
            inner.core.stats.remove_pending(data.len());
            let event = SocketEvent::SendReply {
                socket: inner.core.id,
                result,
            };
            inner.core.owner.deliver(event).await;
        });
        Ok(())
    }

    /// Flushes, sends FIN and releases the descriptor. Closing twice is a
    /// no-op.
    async fn close(&self) -> Result<()> {
        if !self.inner.core.mark_closed() {
            return Ok(());
        }
        let shutdown = self.inner.writer.lock().await.shutdown().await;
        // Wake any reader still parked on the descriptor.
        let _ = self.inner.core.raw.shutdown();
        tracing::trace!(socket_id = %self.inner.core.id, "Plain socket closed");
        Ok(shutdown?)
    }

    fn sockname(&self) -> Result<SocketAddr> {
        self.inner.core.sockname()
    }

    fn peername(&self) -> Result<SocketAddr> {
        self.inner.core.peername()
    }

    fn peercert(&self) -> Result<PeerCert> {
        Ok(PeerCert::NoTls)
    }

    fn controlling_process(&self, owner: EventSender) -> Result<()> {
        self.inner.core.set_owner(owner)
    }
}
