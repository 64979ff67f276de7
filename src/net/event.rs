//! Completion events and socket ownership.
//!
//! Asynchronous receives and fire-and-forget sends complete by posting a
//! [`SocketEvent`] to the socket's current owner. The owner is whichever
//! task holds the receiving end of the registered channel; it can be
//! replaced at any time with `controlling_process`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;

use crate::error::Error;

/// Relaxed ordering is enough, ids only need to be unique.
static SOCKET_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static RECV_TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub(crate) fn next() -> Self {
        Self(SOCKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sock-{}", self.0)
    }
}

/// Correlates an `async_recv` request with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecvToken(u64);

impl RecvToken {
    pub(crate) fn next() -> Self {
        Self(RECV_TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Completion delivered to a socket's owner.
#[derive(Debug)]
pub enum SocketEvent {
    /// Outcome of an `async_recv` request.
    Recv {
        socket: SocketId,
        token: RecvToken,
        result: Result<Vec<u8>, Error>,
    },
    /// Outcome of a `send_nowait` call.
    SendReply {
        socket: SocketId,
        result: Result<(), Error>,
    },
}

impl SocketEvent {
    /// The socket this event belongs to.
    pub fn socket(&self) -> SocketId {
        match self {
            SocketEvent::Recv { socket, .. } | SocketEvent::SendReply { socket, .. } => *socket,
        }
    }
}

/// Sending side of an owner's event channel.
pub type EventSender = mpsc::Sender<SocketEvent>;

/// Receiving side of an owner's event channel.
pub type EventReceiver = mpsc::Receiver<SocketEvent>;

/// Create an owner channel holding at most `capacity` undelivered events.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

/// The task currently entitled to a socket's events.
#[derive(Debug, Default)]
pub(crate) struct Owner {
    sender: ArcSwapOption<EventSender>,
}

impl Owner {
    pub(crate) fn set(&self, sender: EventSender) -> Result<(), Error> {
        if sender.is_closed() {
            return Err(Error::InvalidOwner);
        }
        self.sender.store(Some(Arc::new(sender)));
        Ok(())
    }

    /// Deliver `event` to whoever owns the socket at delivery time. Events
    /// without a live owner are dropped.
    pub(crate) async fn deliver(&self, event: SocketEvent) {
        let Some(sender) = self.sender.load_full() else {
            tracing::debug!(socket_id = %event.socket(), "No owner registered, dropping event");
            return;
        };
        if let Err(mpsc::error::SendError(event)) = sender.send(event).await {
            tracing::debug!(socket_id = %event.socket(), "Owner went away, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(socket: SocketId) -> SocketEvent {
        SocketEvent::SendReply {
            socket,
            result: Ok(()),
        }
    }

    #[test]
    fn socket_ids_are_unique() {
        assert_ne!(SocketId::next(), SocketId::next());
        assert_ne!(RecvToken::next(), RecvToken::next());
    }

    #[tokio::test]
    async fn owner_rejects_closed_channel() {
        let owner = Owner::default();
        let (tx, rx) = event_channel(1);
        drop(rx);
        assert!(matches!(owner.set(tx), Err(Error::InvalidOwner)));
    }

    #[tokio::test]
    async fn deliver_reaches_current_owner() {
        let owner = Owner::default();
        let (first_tx, mut first_rx) = event_channel(4);
        let (second_tx, mut second_rx) = event_channel(4);
        let socket = SocketId::next();

        owner.set(first_tx).unwrap();
        owner.deliver(reply(socket)).await;
        owner.set(second_tx).unwrap();
        owner.deliver(reply(socket)).await;

        assert_eq!(first_rx.recv().await.unwrap().socket(), socket);
        assert_eq!(second_rx.recv().await.unwrap().socket(), socket);
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_without_owner_is_silent() {
        let owner = Owner::default();
        owner.deliver(reply(SocketId::next())).await;
    }
}
