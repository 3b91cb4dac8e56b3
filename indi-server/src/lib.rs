//! INDI server
//!
//! Routes INDI messages between devices and clients. Devices are
//! in-process drivers, driver executables or other INDI servers; clients
//! connect over TCP or any [`ByteStream`](indi_transport::ByteStream).
//! What a peer receives is decided by its [`Subscription`]: the
//! `getProperties` and `enableBLOB` requests it sent.
//!
//! # Usage Example
//! ```rust,no_run
//! use indi_server::{IndiServer, ServerConfig};
//!
//! # async fn run() -> indi_server::IndiResult<()> {
//! let server = IndiServer::new(ServerConfig::default().with_port(7624));
//! server.load_network_device("observatory.local", 7624).await?;
//! server.serve().await
//! # }
//! ```

pub mod config;
pub mod device;
pub mod event;
pub mod listener;
mod reader;
mod router;
pub mod server;
pub mod subscription;

pub use config::{DEFAULT_QUEUE_CAPACITY, ServerConfig};
pub use device::{Device, DeviceKind};
pub use event::ServerEvent;
pub use listener::ServerListener;
pub use server::IndiServer;
pub use subscription::Subscription;

pub use indi_core::{IndiError, IndiResult};
