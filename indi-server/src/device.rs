//! Device backends
//!
//! A device is any peer that serves INDI devices: an in-process driver, a
//! spawned driver executable or another INDI server. The router only sees
//! its byte stream; this module keeps what is needed to identify the
//! backend and to tear it down.

use indi_core::IndiResult;
use indi_transport::{ProcessTransport, TcpTransport, TransportLayer};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of device backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    InProcess,
    Process,
    Remote,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::InProcess => "in-process driver",
            DeviceKind::Process => "driver process",
            DeviceKind::Remote => "remote server",
        })
    }
}

enum Backend {
    InProcess {
        task: JoinHandle<IndiResult<()>>,
        cancel: CancellationToken,
    },
    Process(ProcessTransport),
    Remote(TcpTransport),
}

/// A loaded backend and the device names seen from it
pub struct Device {
    identifier: String,
    backend: Backend,
    names: Vec<String>,
}

impl Device {
    pub(crate) fn in_process(
        identifier: &str,
        task: JoinHandle<IndiResult<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_backend(identifier.to_string(), Backend::InProcess { task, cancel })
    }

    pub(crate) fn process(transport: ProcessTransport) -> Self {
        Self::with_backend(transport.identifier(), Backend::Process(transport))
    }

    pub(crate) fn remote(transport: TcpTransport) -> Self {
        Self::with_backend(transport.identifier(), Backend::Remote(transport))
    }

    fn with_backend(identifier: String, backend: Backend) -> Self {
        Self {
            identifier,
            backend,
            names: Vec::new(),
        }
    }

    /// Identifier used for duplicate detection and unloading
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> DeviceKind {
        match self.backend {
            Backend::InProcess { .. } => DeviceKind::InProcess,
            Backend::Process(_) => DeviceKind::Process,
            Backend::Remote(_) => DeviceKind::Remote,
        }
    }

    /// Device names this backend has announced, in discovery order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Remember a device name seen in a message from this backend
    ///
    /// Returns true if the name is new.
    pub(crate) fn discover(&mut self, name: &str) -> bool {
        if name.is_empty() || self.has_name(name) {
            return false;
        }
        log::debug!("{} serves device {}", self.identifier, name);
        self.names.push(name.to_string());
        true
    }

    /// Stop the backend: cancel the driver task, kill the process or close
    /// the socket
    pub(crate) async fn close(self) {
        match self.backend {
            Backend::InProcess { task, cancel } => {
                cancel.cancel();
                match tokio::time::timeout(DRIVER_STOP_TIMEOUT, task).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => log::warn!("Driver {} ended with error: {}", self.identifier, e),
                    Ok(Err(e)) => log::warn!("Driver {} panicked: {}", self.identifier, e),
                    Err(_) => log::warn!("Driver {} did not stop in time", self.identifier),
                }
            }
            Backend::Process(mut transport) => {
                if let Err(e) = transport.close().await {
                    log::warn!("Failed to stop {}: {}", self.identifier, e);
                }
            }
            Backend::Remote(mut transport) => {
                if let Err(e) = transport.close().await {
                    log::warn!("Failed to close {}: {}", self.identifier, e);
                }
            }
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind())
            .field("names", &self.names)
            .finish()
    }
}
