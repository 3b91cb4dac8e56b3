//! Byte streams and the transport layer trait

use async_trait::async_trait;
use indi_core::IndiResult;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Readable half of a peer connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a peer connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Duplex byte stream to one peer, split into halves so reading and writing
/// can live in different tasks
pub struct ByteStream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl ByteStream {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a single duplex object into a byte stream
    pub fn from_duplex<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// A backend that can be opened into a [`ByteStream`] and torn down again
#[async_trait]
pub trait TransportLayer: Send {
    /// Open the underlying connection (connect, spawn, ...)
    async fn open(&mut self) -> IndiResult<()>;

    /// Hand out the byte stream of an opened transport
    ///
    /// The stream can be taken once; later calls fail with `NotFound`.
    fn take_stream(&mut self) -> IndiResult<ByteStream>;

    /// Release the connection; idempotent
    async fn close(&mut self) -> IndiResult<()>;

    /// Check if the transport is closed
    fn is_closed(&self) -> bool;

    /// Stable description of the backend, used for duplicate detection
    fn identifier(&self) -> String;
}
