//! Bounded shutdown.
//!
//! # Responsibilities
//! - Close a socket within a fixed time whatever the peer does
//! - Always release the local descriptor
//!
//! # Design Decisions
//! - The TLS close handshake runs on its own task and races a timer; the
//!   loser of the race is dropped or aborted
//! - Nothing here reports failure: callers are already tearing down

use std::time::Duration;

use crate::net::socket::{Socket, SocketOps};

/// How long `fast_close` waits for a TLS close handshake by default.
pub const DEFAULT_FAST_CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);

impl Socket {
    /// Close the socket, returning within about `timeout`.
    ///
    /// Plain sockets are closed abruptly. TLS sockets first get up to
    /// `timeout` to complete their close handshake on a helper task; the
    /// helper is aborted if it has not finished by then. Either way the raw
    /// descriptor is closed afterwards. Never fails.
    pub async fn fast_close(&self, timeout: Duration) {
        match self {
            Socket::Plain(plain) => {
                plain.abort();
                record_fast_close("abrupt");
            }
            Socket::Tls(tls) => {
                let session = tls.clone();
                let mut handshake = tokio::spawn(async move { session.close().await });
                let outcome = match tokio::time::timeout(timeout, &mut handshake).await {
                    Ok(Ok(Ok(()))) => "graceful",
                    Ok(Ok(Err(e))) => {
                        tracing::debug!(
                            socket_id = %tls.id(),
                            error = %e,
                            "TLS close handshake failed"
                        );
                        "failed"
                    }
                    Ok(Err(join_error)) => {
                        tracing::debug!(
                            socket_id = %tls.id(),
                            error = %join_error,
                            "TLS close task died"
                        );
                        "failed"
                    }
                    Err(_) => {
                        handshake.abort();
                        // Cancellation is expected here and stays local.
                        let _ = handshake.await;
                        tracing::warn!(
                            socket_id = %tls.id(),
                            timeout_ms = timeout.as_millis() as u64,
                            "TLS close handshake timed out, closing descriptor"
                        );
                        "timeout"
                    }
                };
                tls.abort();
                record_fast_close(outcome);
            }
        }
    }
}

fn record_fast_close(outcome: &'static str) {
    metrics::counter!("broker_net_fast_close_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn plain_pair() -> (Socket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Socket::plain(server).unwrap(), client)
    }

    #[tokio::test]
    async fn plain_fast_close_marks_closed() {
        let (socket, _peer) = plain_pair().await;
        socket.fast_close(DEFAULT_FAST_CLOSE_TIMEOUT).await;
        assert!(matches!(socket.sockname(), Err(crate::Error::Closed)));
    }

    #[tokio::test]
    async fn plain_fast_close_twice_is_quiet() {
        let (socket, _peer) = plain_pair().await;
        socket.fast_close(DEFAULT_FAST_CLOSE_TIMEOUT).await;
        socket.fast_close(DEFAULT_FAST_CLOSE_TIMEOUT).await;
    }
}
