//! Accept finalization: ack, buffer tuning and handle budget.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_net::net::connector::connect_tls;
use broker_net::net::{
    accept_ack, AcceptAck, AcceptOutcome, AcceptRef, FileHandleBudget, Listener, SockOpt,
    SockOptName, SocketOps,
};
use broker_net::{Error, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

mod common;

/// Acknowledges everything, or nothing, and counts calls.
struct FakeListener {
    accept: bool,
    acks: AtomicUsize,
}

impl FakeListener {
    fn new(accept: bool) -> Self {
        Self {
            accept,
            acks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AcceptAck for FakeListener {
    async fn accept_ack(&self, accept_ref: &AcceptRef) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        if self.accept {
            Ok(())
        } else {
            let reason = format!("handoff {} refused", accept_ref.handoff);
            Err(Error::AcceptAck(reason))
        }
    }
}

fn fake_ref() -> AcceptRef {
    AcceptRef::new(0, 1)
}

#[tokio::test]
async fn accepted_socket_is_tuned_and_budgeted() {
    let listener = Listener::from_tcp(TcpListener::bind("127.0.0.1:0").await.unwrap(), None);
    let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
    let (socket, accept_ref) = listener.accept().await.unwrap().establish().await.unwrap();
    let budget = FileHandleBudget::new(1);

    let kernel = socket
        .getopts(&[SockOptName::SendBuffer, SockOptName::RecvBuffer])
        .unwrap();
    let expected = kernel
        .iter()
        .filter_map(SockOpt::buffer_size)
        .chain([8192])
        .max()
        .unwrap();

    let outcome = accept_ack(&listener, accept_ref, socket, &budget).await.unwrap();
    let AcceptOutcome::Ready { socket, permit } = outcome else {
        panic!("socket was rejected");
    };
    assert_eq!(listener.pending(), 0);
    assert_eq!(budget.available(), 0);
    assert_eq!(
        socket.getopts(&[SockOptName::Buffer]).unwrap(),
        vec![SockOpt::Buffer(expected)]
    );

    drop(permit);
    assert_eq!(budget.available(), 1);
}

#[tokio::test]
async fn tuning_failure_closes_without_error() {
    let (server, client) = common::plain_pair().await;
    server.close().await.unwrap();
    let listener = FakeListener::new(true);
    let budget = FileHandleBudget::new(1);

    let outcome = accept_ack(&listener, fake_ref(), server, &budget).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::Rejected));
    assert_eq!(listener.acks.load(Ordering::SeqCst), 1);
    assert_eq!(budget.available(), 1);
    drop(client);
}

#[tokio::test]
async fn ack_failure_is_fatal() {
    let (server, _client) = common::plain_pair().await;
    let listener = FakeListener::new(false);
    let budget = FileHandleBudget::new(1);

    let result = accept_ack(&listener, fake_ref(), server, &budget).await;
    assert!(matches!(result, Err(Error::AcceptAck(_))));
    assert_eq!(budget.available(), 1);
}

#[tokio::test]
async fn tls_socket_is_finalized_like_plain() {
    let fixture = common::tls_fixture();
    let (server, _client) = common::tls_pair(&fixture).await;
    let listener = FakeListener::new(true);
    let budget = FileHandleBudget::new(4);

    let outcome = accept_ack(&listener, fake_ref(), server, &budget).await.unwrap();
    let AcceptOutcome::Ready { socket, .. } = outcome else {
        panic!("socket was rejected");
    };
    assert!(socket.is_tls());
    assert_eq!(budget.available(), 3);
}

#[tokio::test]
async fn silent_client_does_not_hold_up_accept() {
    let fixture = common::tls_fixture();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, Some(Arc::clone(&fixture.server)))
        .with_handshake_timeout(Duration::from_millis(200));
    let addr = listener.local_addr().unwrap();

    // Connects first and never sends a ClientHello.
    let _silent = TcpStream::connect(addr).await.unwrap();
    let client_config = Arc::clone(&fixture.client);
    let client = tokio::spawn(async move {
        connect_tls(addr, client_config, "localhost").await
    });

    let (first, second) = timeout(Duration::from_secs(2), async {
        (listener.accept().await.unwrap(), listener.accept().await.unwrap())
    })
    .await
    .expect("accept stalled behind a silent client");
    assert_eq!(listener.pending(), 2);

    let (first, second) = tokio::join!(first.establish(), second.establish());
    let (established, timed_out) = match (first, second) {
        (Ok(ready), Err(e)) | (Err(e), Ok(ready)) => (ready, e),
        other => panic!("expected one handshake to finish and one to time out: {other:?}"),
    };
    assert!(matches!(timed_out, Error::Timeout));
    assert!(established.0.is_tls());
    assert_eq!(listener.pending(), 1);

    let (socket, accept_ref) = established;
    let budget = FileHandleBudget::new(1);
    let outcome = accept_ack(&listener, accept_ref, socket, &budget).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::Ready { .. }));
    assert_eq!(listener.pending(), 0);
    assert!(client.await.unwrap().is_ok());
}

#[tokio::test]
async fn unacknowledged_socket_is_not_tracked_forever() {
    let listener = Listener::from_tcp(TcpListener::bind("127.0.0.1:0").await.unwrap(), None);
    let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();

    let handoff = listener.accept().await.unwrap();
    let task = tokio::spawn(async move {
        let (_socket, _accept_ref) = handoff.establish().await.unwrap();
        panic!("connection task died before acknowledging");
    });
    assert!(task.await.unwrap_err().is_panic());
    assert_eq!(listener.pending(), 0);
}
