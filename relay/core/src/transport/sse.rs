//! Server-Sent Events Adapter
//!
//! Drains one connection's inbox into an [`EventSink`].
//!
//! # Connection Lifecycle
//!
//! ```text
//! Connecting ──register──► Flushing ──latch fired──► Live ──► Closed
//!                             │                        │
//!                             └──── cancel / sink error / inbox closed
//! ```
//!
//! `Closed` always ends with [`StreamRegistry::release`], so a connection that
//! was replaced by a newer one leaves its successor registered.

use std::fmt;

use tokio_util::sync::CancellationToken;

use super::{encode_frame, EventSink};
use crate::fragment::ConversationId;
use crate::streaming::{InboxHandle, StreamRegistry};

/// Phase of one connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet registered
    Connecting,
    /// Registered; the pre-registration buffer is still being replayed
    Flushing,
    /// Buffer replayed; new fragments are delivered as they are routed
    Live,
    /// Drain loop finished and the stream was released
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Flushing => "flushing",
            Self::Live => "live",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a drain loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The connection's cancellation token fired
    Cancelled,
    /// The registry dropped the stream (unregistered or replaced)
    InboxClosed,
    /// Writing to the peer failed
    SinkClosed,
}

/// Summary of a finished connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Why the loop ended
    pub outcome: DrainOutcome,
    /// Frames written to the sink
    pub delivered: usize,
    /// Whether this connection's stream was still registered on exit
    pub released: bool,
}

/// Per-connection bridge between the registry and the network
#[derive(Clone, Debug)]
pub struct SseAdapter {
    registry: StreamRegistry,
}

impl SseAdapter {
    /// Create an adapter over `registry`
    #[must_use]
    pub fn new(registry: StreamRegistry) -> Self {
        Self { registry }
    }

    /// Registry this adapter registers connections with
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Register a connection for `conversation_id`
    ///
    /// Any buffered fragments start replaying into the returned handle
    /// straight away.
    pub fn connect(&self, conversation_id: impl Into<ConversationId>) -> InboxHandle {
        let conversation_id = conversation_id.into();
        tracing::debug!(
            conversation_id = %conversation_id,
            state = %ConnectionState::Connecting,
            "Connection accepted"
        );
        self.registry.register(conversation_id)
    }

    /// Forward inbox messages to `sink` until cancelled or disconnected
    ///
    /// Each message is framed, written and flushed before the next one is
    /// taken. The stream is released from the registry on every exit path.
    pub async fn run<S>(
        &self,
        mut handle: InboxHandle,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> DrainReport
    where
        S: EventSink + ?Sized,
    {
        let mut state = if handle.is_flushed() {
            ConnectionState::Live
        } else {
            ConnectionState::Flushing
        };
        let mut delivered = 0usize;

        tracing::debug!(
            conversation_id = %handle.conversation_id(),
            stream_id = %handle.id(),
            state = %state,
            "Connection draining"
        );

        let outcome = loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break DrainOutcome::Cancelled,
                next = handle.recv() => match next {
                    Some(message) => message,
                    None => break DrainOutcome::InboxClosed,
                },
            };

            let frame = match encode_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %handle.conversation_id(),
                        error = %e,
                        "Failed to encode event, skipping"
                    );
                    continue;
                }
            };

            let written = match sink.write_frame(frame).await {
                Ok(()) => sink.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(
                    conversation_id = %handle.conversation_id(),
                    stream_id = %handle.id(),
                    error = %e,
                    "Event sink closed"
                );
                break DrainOutcome::SinkClosed;
            }
            delivered += 1;

            if state == ConnectionState::Flushing && handle.is_flushed() {
                state = ConnectionState::Live;
                tracing::debug!(
                    conversation_id = %handle.conversation_id(),
                    stream_id = %handle.id(),
                    delivered,
                    "Buffer replayed, connection live"
                );
            }
        };

        let released = self.registry.release(&handle);
        tracing::info!(
            conversation_id = %handle.conversation_id(),
            stream_id = %handle.id(),
            outcome = ?outcome,
            delivered,
            state = %ConnectionState::Closed,
            "Connection closed"
        );

        DrainReport {
            outcome,
            delivered,
            released,
        }
    }
}
