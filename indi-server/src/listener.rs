//! TCP listener accepting INDI clients

use crate::server::IndiServer;
use indi_core::{IndiError, IndiResult};
use indi_transport::{TcpTransport, TransportLayer};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Accepts TCP connections and hands them to an [`IndiServer`] as clients
///
/// # Usage Example
/// ```rust,no_run
/// use indi_server::{IndiServer, ServerListener};
///
/// # async fn run() -> indi_server::IndiResult<()> {
/// let server = IndiServer::default();
/// let listener = ServerListener::bind(server, "0.0.0.0:7624".parse().unwrap()).await?;
/// listener.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct ServerListener {
    server: IndiServer,
    listener: TcpListener,
    address: SocketAddr,
}

impl ServerListener {
    /// Bind the listening socket
    ///
    /// # Errors
    /// Returns `Connection` if the address cannot be bound
    pub async fn bind(server: IndiServer, address: SocketAddr) -> IndiResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            IndiError::Connection(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("Failed to bind to {}: {}", address, e),
            ))
        })?;
        let address = listener.local_addr()?;
        Ok(Self {
            server,
            listener,
            address,
        })
    }

    /// Address actually bound, with the port resolved if 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Accept clients until the server is stopped
    pub async fn run(self) -> IndiResult<()> {
        let shutdown = self.server.shutdown_token();
        log::info!("INDI server listening on {}", self.address);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    log::info!("Accepted connection from {}", peer_addr);
                    if let Err(e) = self.accept_client(stream, peer_addr).await {
                        log::error!("Error handling connection from {}: {}", peer_addr, e);
                    }
                }
                Err(e) => {
                    // Keep accepting other connections
                    log::error!("Error accepting connection: {}", e);
                }
            }
        }

        log::info!("Stopped listening on {}", self.address);
        Ok(())
    }

    async fn accept_client(&self, stream: TcpStream, peer_addr: SocketAddr) -> IndiResult<()> {
        stream.set_nodelay(true)?;
        let mut transport = TcpTransport::from_connected_stream(stream);
        let stream = transport.take_stream()?;
        self.server.add_client(stream, &peer_addr.to_string()).await
    }
}
