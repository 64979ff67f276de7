//! broker-net demo server.
//!
//! Accepts connections, finalizes each one, logs where it came from and
//! echoes whatever the peer sends until it hangs up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use broker_net::config::{load_config, NetConfig};
use broker_net::net::{
    accept_ack, is_loopback, AcceptOutcome, AcceptRef, Direction, EndpointResolver,
    FileHandleBudget, Listener, Received, Socket, SocketOps,
};
use broker_net::observability::{logging, metrics};
use clap::Parser;

#[derive(Parser)]
#[command(name = "broker-net")]
#[command(about = "Plain/TLS transport facade demo server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => NetConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("broker-net v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?);
    }

    let server = Arc::new(Server {
        listener: Listener::bind(&config.listener).await?,
        budget: FileHandleBudget::new(config.listener.max_connections),
        resolver: EndpointResolver::new(&config.resolver),
        close_timeout: config.shutdown.fast_close_timeout(),
    });

    loop {
        tokio::select! {
            accepted = server.listener.accept() => {
                let handoff = match accepted {
                    Ok(handoff) => handoff,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    let peer_addr = handoff.peer_addr();
                    match handoff.establish().await {
                        Ok((socket, accept_ref)) => server.serve(accept_ref, socket).await,
                        Err(e) => {
                            tracing::debug!(peer_addr = %peer_addr, error = %e, "Handoff failed");
                        }
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    server.budget.close();
    tracing::info!("Shutdown complete");
    Ok(())
}

/// State shared by every connection task.
struct Server {
    listener: Listener,
    budget: FileHandleBudget,
    resolver: EndpointResolver,
    close_timeout: Duration,
}

impl Server {
    async fn serve(&self, accept_ref: AcceptRef, socket: Socket) {
        let outcome = accept_ack(&self.listener, accept_ref, socket, &self.budget).await;
        let (socket, _permit) = match outcome {
            Ok(AcceptOutcome::Ready { socket, permit }) => (socket, permit),
            Ok(AcceptOutcome::Rejected) => return,
            Err(e) => {
                tracing::error!(error = %e, "Accept finalization failed");
                return;
            }
        };

        let inbound = Direction::Inbound;
        match self.resolver.connection_string(&socket, inbound).await {
            Ok(name) => tracing::info!(
                socket_id = %socket.id(),
                connection = %name,
                tls = socket.is_tls(),
                loopback = is_loopback(&socket),
                "Connection ready"
            ),
            Err(e) => {
                tracing::debug!(
                    socket_id = %socket.id(),
                    error = %e,
                    "Peer left before it could be named"
                );
                socket.fast_close(self.close_timeout).await;
                return;
            }
        }

        loop {
            match socket.recv().await {
                Ok(Received::Data(data)) => {
                    if let Err(e) = socket.send(&data).await {
                        tracing::debug!(socket_id = %socket.id(), error = %e, "Send failed");
                        break;
                    }
                }
                Ok(Received::Closed) => break,
                Err(e) => {
                    tracing::debug!(socket_id = %socket.id(), error = %e, "Receive failed");
                    break;
                }
            }
        }

        socket.fast_close(self.close_timeout).await;
        tracing::debug!(socket_id = %socket.id(), "Connection finished");
    }
}
