//! Server configuration

use indi_core::{DEFAULT_PORT, PROTOCOL_VERSION};
use indi_protocol::DEFAULT_CHUNK_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of frames queued for one peer before it is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub listen_address: SocketAddr,
    /// Timeout for connecting to remote INDI servers
    pub connect_timeout: Duration,
    /// Protocol version sent in server-generated `getProperties`
    pub protocol_version: String,
    /// Outbound frames buffered per peer; a peer whose queue is full is
    /// torn down
    pub queue_capacity: usize,
    /// Bytes requested per read of a peer stream
    pub read_chunk_size: usize,
    /// Forward accepted `enableBLOB` requests to the device
    pub forward_enable_blob: bool,
    /// Base directory for saveable properties of in-process drivers
    pub properties_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(20),
            protocol_version: PROTOCOL_VERSION.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            forward_enable_blob: false,
            properties_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn with_listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_address.set_port(port);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_forward_enable_blob(mut self, forward: bool) -> Self {
        self.forward_enable_blob = forward;
        self
    }

    pub fn with_properties_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.properties_dir = Some(dir.into());
        self
    }
}
