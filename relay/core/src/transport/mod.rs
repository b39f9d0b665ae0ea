//! Transport Layer for Live Connections
//!
//! Bridges one registered stream to one outbound connection using
//! server-sent-event framing.
//!
//! - [`frame`]: `data: {"message": ...}\n\n` encoding
//! - [`EventSink`]: where frames are written (an HTTP body, a test buffer)
//! - [`SseAdapter`]: the per-connection drain loop
//!
//! The adapter never retries a frame. A message taken from the inbox is
//! either written to the sink or lost with the connection.

pub mod frame;
pub mod in_process;
mod sse;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use frame::encode_frame;
pub use in_process::ChannelSink;
pub use sse::{ConnectionState, DrainOutcome, DrainReport, SseAdapter};

/// Errors from the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// Message could not be serialized into a frame
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Peer went away
    #[error("event sink closed")]
    SinkClosed,
}

/// Destination for encoded event frames
///
/// The adapter calls [`write_frame`](EventSink::write_frame) then
/// [`flush`](EventSink::flush) for every frame; frames are never coalesced.
#[async_trait]
pub trait EventSink: Send {
    /// Write one complete frame
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Push written frames to the peer
    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl EventSink for Vec<Bytes> {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.push(frame);
        Ok(())
    }
}
