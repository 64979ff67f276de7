//! Outbound connections.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::net::socket::Socket;

/// Open a plaintext connection to `addr`.
pub async fn connect_plain(addr: SocketAddr) -> Result<Socket> {
    let stream = TcpStream::connect(addr).await?;
    tracing::debug!(peer_addr = %addr, "Connected");
    Socket::plain(stream)
}

/// Open a TLS connection to `addr`, verifying the server as `server_name`.
pub async fn connect_tls(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> Result<Socket> {
    let name = ServerName::try_from(server_name.to_owned())
        .map_err(|_| Error::InvalidServerName(server_name.to_owned()))?;
    let stream = TcpStream::connect(addr).await?;
    let stream = TlsConnector::from(config).connect(name, stream).await?;
    tracing::debug!(peer_addr = %addr, server_name, "TLS connected");
    Socket::tls(stream.into())
}
