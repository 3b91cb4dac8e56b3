//! indi_rs - Rust implementation of the INDI protocol
//!
//! INDI (Instrument Neutral Distributed Interface) connects astronomical
//! instrument drivers to clients through a server that routes XML
//! messages according to what each peer subscribed to.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `indi-core`: Error type, protocol enums and the property/element model
//! - `indi-protocol`: Message types, XML encoder and stream decoder
//! - `indi-transport`: Byte-stream backends (TCP, driver process, pipe)
//! - `indi-driver`: In-process driver framework
//! - `indi-server`: Subscription-aware router and TCP listener
//!
//! # Usage
//!
//! ```no_run
//! use indi::server::{IndiServer, ServerConfig};
//!
//! # async fn run() -> indi::IndiResult<()> {
//! let server = IndiServer::new(ServerConfig::default());
//! server.load_native_driver("/usr/bin/indi_simulator_telescope", &[]).await?;
//! server.serve().await
//! # }
//! ```

// Re-export core types
pub use indi_core::*;

pub mod protocol {
    pub use indi_protocol::*;
}

pub mod transport {
    pub use indi_transport::*;
}

pub mod driver {
    pub use indi_driver::*;
}

pub mod server {
    pub use indi_server::*;
}
