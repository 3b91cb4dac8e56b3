//! INDI server
//!
//! [`IndiServer`] owns the router state and the device backends. Peers are
//! added either by loading a device (in-process driver, driver executable
//! or remote server) or by accepting a client stream; each then runs its
//! own reader and writer task.

use crate::config::ServerConfig;
use crate::device::Device;
use crate::event::ServerEvent;
use crate::listener::ServerListener;
use crate::reader::{ConnectionReader, write_loop};
use crate::router::{PeerHandle, PeerId, RemovedPeer, RouterState};
use indi_core::{IndiError, IndiResult};
use indi_driver::{DriverConfig, DriverRegistry, DriverRunner};
use indi_protocol::{Frame, GetProperties, IndiMessage, IndiMessageEncoder};
use indi_transport::{
    ByteStream, PipeTransport, ProcessSettings, ProcessTransport, TcpSettings, TcpTransport,
    TransportLayer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 64;

struct Inner {
    config: ServerConfig,
    /// In-process drivers that `load_driver` can start by name
    registry: DriverRegistry,
    /// Peers, subscriptions and loaded devices; every fan-out runs under it
    state: Mutex<RouterState>,
    /// Serialises loads so the duplicate check and the insertion agree
    loading: Mutex<()>,
    /// Lifecycle notifications for [`IndiServer::subscribe`]
    events: broadcast::Sender<ServerEvent>,
    /// Stops the accept loop; cancelled by [`IndiServer::stop`]
    shutdown: CancellationToken,
    /// Source of [`PeerId`]s, never reused
    next_peer: AtomicU64,
}

/// Routes messages between devices and clients
///
/// Cheap to clone; all clones share the same state.
///
/// # Usage Example
/// ```rust,no_run
/// use indi_server::{IndiServer, ServerConfig};
///
/// # async fn run() -> indi_server::IndiResult<()> {
/// let server = IndiServer::new(ServerConfig::default());
/// server.load_native_driver("/usr/bin/indi_simulator_ccd", &[]).await?;
/// server.serve().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct IndiServer {
    inner: Arc<Inner>,
}

impl IndiServer {
    /// Create a server without in-process drivers
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, DriverRegistry::new())
    }

    /// Create a server that can load the drivers of `registry`
    pub fn with_registry(config: ServerConfig, registry: DriverRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RouterState::new(config.forward_enable_blob)),
                config,
                registry,
                loading: Mutex::new(()),
                events,
                shutdown: CancellationToken::new(),
                next_peer: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.inner.registry
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Start an in-process driver from the registry
    ///
    /// # Errors
    ///
    /// `AlreadyLoaded` if a device with this identifier is live,
    /// `UnknownDriver` if nothing is registered under it
    pub async fn load_driver(&self, identifier: &str) -> IndiResult<()> {
        let _loading = self.inner.loading.lock().await;
        self.ensure_not_loaded(identifier).await?;
        let driver = self.inner.registry.create(identifier)?;

        let mut config = DriverConfig::default().with_read_chunk_size(self.inner.config.read_chunk_size);
        if let Some(dir) = &self.inner.config.properties_dir {
            config = config.with_properties_dir(dir.clone());
        }

        let mut transport = PipeTransport::new(identifier);
        transport.open().await?;
        let driver_side = transport.take_remote()?;
        let server_side = transport.take_stream()?;

        let cancel = CancellationToken::new();
        let task = DriverRunner::new(driver, config).spawn(driver_side, cancel.clone());
        self.add_device(Device::in_process(identifier, task, cancel), server_side)
            .await;
        Ok(())
    }

    /// Spawn a driver executable; its identifier is the program path
    ///
    /// # Errors
    ///
    /// `AlreadyLoaded` for a path already running, `Backend` if the
    /// process cannot be spawned
    pub async fn load_native_driver(&self, path: impl Into<PathBuf>, args: &[String]) -> IndiResult<()> {
        let settings = ProcessSettings::new(path).with_args(args.iter().cloned());
        let mut transport = ProcessTransport::new(settings);

        let _loading = self.inner.loading.lock().await;
        self.ensure_not_loaded(&transport.identifier()).await?;
        transport.open().await?;
        let stream = transport.take_stream()?;
        self.add_device(Device::process(transport), stream).await;
        Ok(())
    }

    /// Connect to another INDI server and serve its devices; the identifier
    /// is `host:port`
    ///
    /// # Errors
    ///
    /// `AlreadyLoaded` for a server already connected, `Timeout` or
    /// `Connection` if it cannot be reached
    pub async fn load_network_device(&self, host: &str, port: u16) -> IndiResult<()> {
        let settings = TcpSettings::with_timeout(host, port, self.inner.config.connect_timeout);
        let mut transport = TcpTransport::new(settings);

        let _loading = self.inner.loading.lock().await;
        self.ensure_not_loaded(&transport.identifier()).await?;
        transport.open().await?;
        let stream = transport.take_stream()?;
        self.add_device(Device::remote(transport), stream).await;
        Ok(())
    }

    pub async fn is_already_loaded(&self, identifier: &str) -> bool {
        self.inner
            .state
            .lock()
            .await
            .device_by_identifier(identifier)
            .is_some()
    }

    /// Remove a device and tell its listeners it is gone
    ///
    /// # Errors
    ///
    /// `NotFound` if no device is loaded under `identifier`
    pub async fn unload(&self, identifier: &str) -> IndiResult<()> {
        let id = self
            .inner
            .state
            .lock()
            .await
            .device_by_identifier(identifier)
            .ok_or_else(|| IndiError::NotFound(format!("No device loaded as {}", identifier)))?;
        self.remove_peer(id).await;
        Ok(())
    }

    pub async fn device_identifiers(&self) -> Vec<String> {
        self.inner.state.lock().await.device_identifiers()
    }

    /// Device names announced by all loaded backends
    pub async fn device_names(&self) -> Vec<String> {
        self.inner.state.lock().await.device_names()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.state.lock().await.client_count()
    }

    /// Serve a connected client
    ///
    /// # Errors
    ///
    /// `Connection` once the server is stopped
    pub async fn add_client(&self, stream: ByteStream, label: &str) -> IndiResult<()> {
        if self.is_stopped() {
            return Err(IndiError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Server is stopped",
            )));
        }

        let id = self.next_peer_id();
        let (handle, reader) = self.open_peer(id, label, stream);
        self.inner.state.lock().await.add_client(id, handle);
        tokio::spawn(reader.run(self.clone()));

        log::info!("Client {} connected", label);
        self.emit(ServerEvent::ClientConnected {
            label: label.to_string(),
        });
        Ok(())
    }

    /// Accept TCP clients on the configured address until [`stop`](Self::stop)
    pub async fn serve(&self) -> IndiResult<()> {
        let listener = ServerListener::bind(self.clone(), self.inner.config.listen_address).await?;
        listener.run().await
    }

    /// Stop accepting clients and disconnect the connected ones
    ///
    /// Loaded devices stay until unloaded.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let clients = self.inner.state.lock().await.client_ids();
        for id in clients {
            self.remove_peer(id).await;
        }
        log::info!("Server stopped");
    }

    pub(crate) async fn route(&self, from: PeerId, frame: Frame) {
        let events = self.inner.state.lock().await.route(from, &frame);
        for event in events {
            if let ServerEvent::DeviceWithdrawn { name } = &event {
                log::info!("Device {} withdrawn", name);
            }
            self.emit(event);
        }
    }

    /// Remove a peer from the live sets and run its teardown
    ///
    /// Removing an already removed peer does nothing.
    pub(crate) async fn remove_peer(&self, id: PeerId) {
        let removed = self.inner.state.lock().await.remove(id);
        match removed {
            Some(RemovedPeer::Device(peer)) => {
                let identifier = peer.device.identifier().to_string();
                let names = peer.device.names().to_vec();
                peer.device.close().await;

                log::info!("Removed device {} [{}]", identifier, names.join(", "));
                self.emit(ServerEvent::DeviceRemoved { identifier, names });
            }
            Some(RemovedPeer::Client(peer)) => {
                let label = peer.handle.label().to_string();
                log::info!("Client {} disconnected", label);
                self.emit(ServerEvent::ClientDisconnected { label });
            }
            None => {}
        }
    }

    async fn ensure_not_loaded(&self, identifier: &str) -> IndiResult<()> {
        if self.is_already_loaded(identifier).await {
            return Err(IndiError::AlreadyLoaded(identifier.to_string()));
        }
        Ok(())
    }

    /// Register a device and ask it for its properties
    async fn add_device(&self, device: Device, stream: ByteStream) {
        let id = self.next_peer_id();
        let identifier = device.identifier().to_string();
        let kind = device.kind();
        let (handle, reader) = self.open_peer(id, &identifier, stream);

        let hello = IndiMessage::GetProperties(GetProperties {
            version: self.inner.config.protocol_version.clone(),
            device: None,
            name: None,
        });
        match IndiMessageEncoder::encode(&hello) {
            Ok(raw) => handle.deliver(&raw),
            Err(e) => log::warn!("Cannot encode getProperties for {}: {}", identifier, e),
        }

        self.inner.state.lock().await.add_device(id, handle, device);
        tokio::spawn(reader.run(self.clone()));

        log::info!("Loaded {} {}", kind, identifier);
        self.emit(ServerEvent::DeviceLoaded { identifier });
    }

    fn open_peer(&self, id: PeerId, label: &str, stream: ByteStream) -> (PeerHandle, ConnectionReader) {
        let ByteStream { reader, writer } = stream;
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        tokio::spawn(write_loop(label.to_string(), writer, rx, cancel.clone()));

        let reader = ConnectionReader::new(id, label, reader, self.inner.config.read_chunk_size, cancel.clone());
        (PeerHandle::new(label, tx, cancel), reader)
    }

    fn next_peer_id(&self) -> PeerId {
        self.inner.next_peer.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: ServerEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }
}

impl Default for IndiServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
