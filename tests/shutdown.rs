//! Bounded shutdown against cooperative and unresponsive peers.

use std::time::{Duration, Instant};

use broker_net::net::{Received, SocketOps, DEFAULT_FAST_CLOSE_TIMEOUT};
use broker_net::Error;
use tokio::time::timeout;

mod common;

#[tokio::test]
async fn tls_fast_close_is_bounded_when_peer_never_answers() {
    let fixture = common::tls_fixture();
    // The client never reads, so it never returns close_notify.
    let (server, _client) = common::tls_pair(&fixture).await;

    let limit = Duration::from_millis(200);
    let started = Instant::now();
    server.fast_close(limit).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= limit, "returned early after {elapsed:?}");
    assert!(elapsed < limit * 6, "fast_close took {elapsed:?}");
    assert!(matches!(server.send(b"x").await, Err(Error::Closed)));
}

#[tokio::test]
async fn tls_fast_close_completes_handshake_with_cooperative_peer() {
    let fixture = common::tls_fixture();
    let (server, client) = common::tls_pair(&fixture).await;

    let peer = tokio::spawn(async move {
        loop {
            match client.recv().await {
                Ok(Received::Data(_)) => continue,
                Ok(Received::Closed) | Err(_) => break,
            }
        }
        client.close().await
    });

    let started = Instant::now();
    server.fast_close(DEFAULT_FAST_CLOSE_TIMEOUT).await;
    assert!(started.elapsed() < Duration::from_secs(4));

    let peer_close = timeout(Duration::from_secs(2), peer).await.unwrap().unwrap();
    assert!(peer_close.is_ok());
}

#[tokio::test]
async fn fast_close_on_closed_socket_is_quiet() {
    let fixture = common::tls_fixture();
    let (tls_server, _tls_client) = common::tls_pair(&fixture).await;
    let (plain_server, _plain_client) = common::plain_pair().await;

    tls_server.fast_close(Duration::from_millis(50)).await;
    tls_server.fast_close(Duration::from_millis(50)).await;
    plain_server.close().await.unwrap();
    plain_server.fast_close(Duration::from_millis(50)).await;

    // A second graceful close on TLS reports the closed session.
    assert!(matches!(tls_server.close().await, Err(Error::Closed)));
}

#[tokio::test]
async fn plain_fast_close_releases_peer() {
    let (server, client) = common::plain_pair().await;
    server.fast_close(DEFAULT_FAST_CLOSE_TIMEOUT).await;

    let seen = timeout(Duration::from_secs(2), client.recv()).await.unwrap();
    assert!(matches!(seen, Ok(Received::Closed) | Err(Error::Io(_))));
}
