//! Transport layer for the INDI protocol
//!
//! Every peer, whatever its backend, is reduced to a [`ByteStream`]: one
//! readable and one writable half. This crate provides the TCP, spawned
//! process and in-memory pipe implementations.

pub mod pipe;
pub mod process;
pub mod stream;
pub mod tcp;

pub use indi_core::{IndiError, IndiResult};
pub use pipe::{PipeTransport, pipe_pair};
pub use process::{ProcessSettings, ProcessTransport};
pub use stream::{BoxedReader, BoxedWriter, ByteStream, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
