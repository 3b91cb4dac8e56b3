//! In-memory pipe transport for in-process drivers and tests

use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use indi_core::{IndiError, IndiResult};

/// Default buffer size of each pipe direction
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Two connected byte streams: what one side writes the other reads
pub fn pipe_pair(capacity: usize) -> (ByteStream, ByteStream) {
    let (left, right) = tokio::io::duplex(capacity);
    (ByteStream::from_duplex(left), ByteStream::from_duplex(right))
}

/// Transport whose far end is handed to an in-process peer
#[derive(Debug)]
pub struct PipeTransport {
    name: String,
    local: Option<ByteStream>,
    remote: Option<ByteStream>,
    closed: bool,
}

impl PipeTransport {
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_PIPE_CAPACITY)
    }

    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        let (local, remote) = pipe_pair(capacity);
        Self {
            name: name.to_string(),
            local: Some(local),
            remote: Some(remote),
            closed: true,
        }
    }

    /// Stream for the in-process peer (the driver side)
    pub fn take_remote(&mut self) -> IndiResult<ByteStream> {
        self.remote
            .take()
            .ok_or_else(|| IndiError::NotFound(format!("Remote end of {} already taken", self.name)))
    }
}

#[async_trait]
impl TransportLayer for PipeTransport {
    async fn open(&mut self) -> IndiResult<()> {
        if self.local.is_none() {
            return Err(IndiError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Pipe already consumed",
            )));
        }
        self.closed = false;
        Ok(())
    }

    fn take_stream(&mut self) -> IndiResult<ByteStream> {
        self.local
            .take()
            .ok_or_else(|| IndiError::NotFound(format!("Local end of {} already taken", self.name)))
    }

    async fn close(&mut self) -> IndiResult<()> {
        self.local = None;
        self.remote = None;
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn identifier(&self) -> String {
        self.name.clone()
    }
}
