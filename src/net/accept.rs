//! Accept finalization.
//!
//! Runs once per accepted connection, after the listener has handed the
//! socket over and before any application data is read:
//!
//! ```text
//! listener ack (fatal on failure)
//!     → buffer tuning (failure closes the socket, not an error)
//!     → file handle budget
//!     → socket ready for connection logic
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::net::budget::{HandleBudget, HandlePermit};
use crate::net::options::{SockOpt, SockOptName};
use crate::net::socket::{Socket, SocketOps};

/// Handoffs a listener has made and not yet seen acknowledged.
pub(crate) type PendingHandoffs = Arc<DashMap<u64, Instant>>;

/// Reference identifying one handoff from a listener.
///
/// A reference issued by [`Listener`](crate::net::Listener) withdraws its
/// pending entry when dropped, so an abandoned handoff is not tracked
/// forever.
pub struct AcceptRef {
    pub listener: u64,
    pub handoff: u64,
    pending: Option<PendingHandoffs>,
}

impl AcceptRef {
    /// A reference not tracked by any listener.
    pub fn new(listener: u64, handoff: u64) -> Self {
        Self {
            listener,
            handoff,
            pending: None,
        }
    }

    pub(crate) fn tracked(listener: u64, handoff: u64, pending: PendingHandoffs) -> Self {
        pending.insert(handoff, Instant::now());
        Self {
            listener,
            handoff,
            pending: Some(pending),
        }
    }
}

impl Drop for AcceptRef {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            if pending.remove(&self.handoff).is_some() {
                tracing::debug!(handoff = self.handoff, "Handoff abandoned before ack");
            }
        }
    }
}

impl fmt::Debug for AcceptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptRef")
            .field("listener", &self.listener)
            .field("handoff", &self.handoff)
            .finish()
    }
}

/// The listener side of the handoff.
#[async_trait]
pub trait AcceptAck: Send + Sync {
    /// Confirm the handoff. An error here is not recoverable by the caller.
    async fn accept_ack(&self, accept_ref: &AcceptRef) -> Result<()>;
}

/// What connection logic receives from [`accept_ack`].
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Tuned socket plus the handle permit it holds. Dropping the permit
    /// releases the handle.
    Ready {
        socket: Socket,
        permit: HandlePermit,
    },
    /// Tuning failed and the socket was closed. The caller should end its
    /// connection task normally.
    Rejected,
}

/// Acknowledge the handoff, tune buffering, then take a file handle.
pub async fn accept_ack<L, B>(
    listener: &L,
    accept_ref: AcceptRef,
    socket: Socket,
    budget: &B,
) -> Result<AcceptOutcome>
where
    L: AcceptAck + ?Sized,
    B: HandleBudget + ?Sized,
{
    listener.accept_ack(&accept_ref).await?;

    if let Err(e) = tune_buffer(&socket) {
        tracing::debug!(
            socket_id = %socket.id(),
            error = %e,
            "Buffer tuning failed, dropping connection"
        );
        socket.abort();
        metrics::counter!("broker_net_accepts_total", "outcome" => "rejected").increment(1);
        return Ok(AcceptOutcome::Rejected);
    }

    let permit = budget.obtain().await?;
    metrics::counter!("broker_net_accepts_total", "outcome" => "ready").increment(1);
    Ok(AcceptOutcome::Ready { socket, permit })
}

/// Raise the user-level buffer to the largest of the send, receive and user
/// buffers.
fn tune_buffer(socket: &Socket) -> Result<()> {
    let sizes = socket.getopts(&[
        SockOptName::SendBuffer,
        SockOptName::RecvBuffer,
        SockOptName::Buffer,
    ])?;
    let max = sizes
        .iter()
        .filter_map(SockOpt::buffer_size)
        .max()
        .unwrap_or(0);
    socket.setopts(&[SockOpt::Buffer(max)])?;
    tracing::trace!(socket_id = %socket.id(), buffer = max, "Socket buffer tuned");
    Ok(())
}
