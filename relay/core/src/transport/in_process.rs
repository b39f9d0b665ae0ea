//! In-Process Event Sink
//!
//! Channel-backed [`EventSink`] for when the network writer runs on another
//! task, e.g. an HTTP response body built from a stream.
//!
//! # Usage
//!
//! ```ignore
//! let (sink, frames) = ChannelSink::new(16);
//!
//! // The HTTP layer turns `frames` into a response body
//! tokio::spawn(async move { adapter.run(handle, sink, cancel).await });
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{EventSink, TransportError};

/// Event sink that forwards frames into a bounded channel
///
/// Writing waits for channel space, so a slow peer slows only its own drain
/// loop. Once the receiver is dropped every write fails with
/// [`TransportError::SinkClosed`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink and the receiver its frames arrive on
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Whether the receiving side is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side is gone
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.write_frame(Bytes::from_static(b"a")).await.unwrap();
        sink.write_frame(Bytes::from_static(b"b")).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_write_after_receiver_dropped() {
        let (mut sink, rx) = ChannelSink::new(4);
        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.write_frame(Bytes::from_static(b"x")).await,
            Err(TransportError::SinkClosed)
        ));
    }
}
