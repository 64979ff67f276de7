//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker_net::net::connector::{connect_plain, connect_tls};
use broker_net::net::tls::{load_client_config, load_server_config};
use broker_net::net::{event_channel, EventReceiver, Socket, SocketEvent, SocketOps};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, ServerConfig};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Self-signed TLS material for `localhost`. The PEM files are removed when
/// the fixture is dropped.
pub struct TlsFixture {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
    pub cert: CertificateDer<'static>,
    _cert_file: NamedTempFile,
    _key_file: NamedTempFile,
}

pub fn tls_fixture() -> TlsFixture {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();

    let mut cert_file = NamedTempFile::new().unwrap();
    let mut key_file = NamedTempFile::new().unwrap();
    cert_file.write_all(certified.cert.pem().as_bytes()).unwrap();
    key_file.write_all(certified.key_pair.serialize_pem().as_bytes()).unwrap();
    cert_file.flush().unwrap();
    key_file.flush().unwrap();

    TlsFixture {
        server: load_server_config(cert_file.path(), key_file.path()).unwrap(),
        client: load_client_config(cert_file.path()).unwrap(),
        cert: certified.cert.der().clone(),
        _cert_file: cert_file,
        _key_file: key_file,
    }
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Connected plaintext sockets: (accepted side, connecting side).
pub async fn plain_pair() -> (Socket, Socket) {
    let (listener, addr) = bind().await;
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client = connect_plain(addr).await.unwrap();
    let server = Socket::plain(accept.await.unwrap()).unwrap();
    (server, client)
}

/// Connected TLS sockets: (accepted side, connecting side).
pub async fn tls_pair(fixture: &TlsFixture) -> (Socket, Socket) {
    let (listener, addr) = bind().await;
    let acceptor = TlsAcceptor::from(Arc::clone(&fixture.server));
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        acceptor.accept(stream).await.unwrap()
    });
    let client = connect_tls(addr, Arc::clone(&fixture.client), "localhost").await.unwrap();
    let server = Socket::tls(accept.await.unwrap().into()).unwrap();
    (server, client)
}

/// Register a fresh owner for `socket` and return its receiver.
pub fn own(socket: &Socket) -> EventReceiver {
    let (tx, rx) = event_channel(16);
    socket.controlling_process(tx).unwrap();
    rx
}

/// Next event, failing the test if none arrives within two seconds.
pub async fn next_event(rx: &mut EventReceiver) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event within 2s")
        .expect("event channel closed")
}
