//! Per-peer I/O tasks
//!
//! Every peer gets a [`ConnectionReader`] feeding decoded frames to the
//! router and a writer task draining its outbound queue. Both stop when
//! the peer's cancellation token fires; the reader then removes the peer
//! from the server.

use crate::router::PeerId;
use crate::server::IndiServer;
use bytes::Bytes;
use indi_protocol::IndiMessageDecoder;
use indi_transport::{BoxedReader, BoxedWriter};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reads one peer's stream until it ends, fails or is cancelled
pub(crate) struct ConnectionReader {
    id: PeerId,
    label: String,
    reader: BoxedReader,
    decoder: IndiMessageDecoder,
    cancel: CancellationToken,
}

impl ConnectionReader {
    pub(crate) fn new(
        id: PeerId,
        label: &str,
        reader: BoxedReader,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            label: label.to_string(),
            reader,
            decoder: IndiMessageDecoder::with_chunk_size(chunk_size),
            cancel,
        }
    }

    pub(crate) async fn run(mut self, server: IndiServer) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = self.decoder.read_frame(&mut self.reader) => frame,
            };

            match frame {
                Ok(Some(frame)) => server.route(self.id, frame).await,
                Ok(None) => {
                    log::debug!("{} closed its stream", self.label);
                    break;
                }
                Err(e) => {
                    log::warn!("Read from {} failed: {}", self.label, e);
                    break;
                }
            }
        }

        self.cancel.cancel();
        server.remove_peer(self.id).await;
    }
}

/// Write queued frames in order until cancelled or the queue closes
pub(crate) async fn write_loop(
    label: String,
    mut writer: BoxedWriter,
    mut queue: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            written = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            } => written,
        };
        if let Err(e) = written {
            log::warn!("Write to {} failed: {}", label, e);
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_loop_preserves_order() {
        let writer = tokio_test::io::Builder::new()
            .write(b"<a/>")
            .write(b"<b/>")
            .build();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(Bytes::from_static(b"<a/>")).await.unwrap();
        tx.send(Bytes::from_static(b"<b/>")).await.unwrap();
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(5),
            write_loop("test".into(), Box::new(writer), rx, cancel.clone()),
        )
        .await
        .unwrap();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_failure_cancels_peer() {
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(Bytes::from_static(b"<a/>")).await.unwrap();

        write_loop("test".into(), Box::new(writer), rx, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }
}
