//! TCP transport implementation

use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use indi_core::{IndiError, IndiResult};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// `host:port`; host names are resolved on connect
    pub address: String,
    pub connect_timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            connect_timeout: Some(Duration::from_secs(20)),
        }
    }

    /// Create TCP settings with a connect timeout
    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..Self::new(host, port)
        }
    }
}

/// TCP transport, used for remote INDI servers and accepted clients
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    settings: TcpSettings,
    taken: bool,
    closed: bool,
}

impl TcpTransport {
    /// Create a new, unconnected TCP transport
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            taken: false,
            closed: true,
        }
    }

    /// Create TCP transport from an already-connected TcpStream (for server use)
    ///
    /// # Arguments
    /// * `stream` - The already-connected TCP stream
    pub fn from_connected_stream(stream: TcpStream) -> Self {
        let address = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            stream: Some(stream),
            settings: TcpSettings {
                address,
                connect_timeout: None,
            },
            taken: false,
            closed: false,
        }
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> IndiResult<()> {
        if !self.closed {
            return Err(IndiError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let address = self.settings.address.as_str();
        let stream = if let Some(timeout) = self.settings.connect_timeout {
            tokio::time::timeout(timeout, TcpStream::connect(address))
                .await
                .map_err(|_| IndiError::Timeout)??
        } else {
            TcpStream::connect(address).await?
        };

        // Protocol messages are small and interactive
        stream.set_nodelay(true)?;

        log::debug!("Connected to {}", self.settings.address);
        self.stream = Some(stream);
        self.taken = false;
        self.closed = false;
        Ok(())
    }

    fn take_stream(&mut self) -> IndiResult<ByteStream> {
        let stream = self.stream.take().ok_or_else(|| {
            IndiError::NotFound(format!("No open TCP stream for {}", self.settings.address))
        })?;
        self.taken = true;

        let (reader, writer) = stream.into_split();
        Ok(ByteStream::new(reader, writer))
    }

    async fn close(&mut self) -> IndiResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        // Halves already handed out close when their owners drop them
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn identifier(&self) -> String {
        self.settings.address.clone()
    }
}
