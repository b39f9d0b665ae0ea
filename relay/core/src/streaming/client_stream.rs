//! Client Stream
//!
//! Per-connection state shared between the registry (writer side) and the
//! transport adapter (reader side): a bounded inbox of display messages and
//! the one-shot flush latch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::latch::FlushLatch;
use crate::fragment::ConversationId;

/// Unique identifier for one registered stream
///
/// Distinguishes successive connections for the same conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Allocate a new unique stream id
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Writer half of a registered connection, owned by the registry
#[derive(Debug)]
pub struct ClientStream {
    id: StreamId,
    conversation_id: ConversationId,
    tx: mpsc::Sender<String>,
    latch: Arc<FlushLatch>,
    registered_at: Instant,
}

impl ClientStream {
    /// Create a stream and its reader handle
    #[must_use]
    pub fn channel(conversation_id: ConversationId, capacity: usize) -> (Self, InboxHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let latch = Arc::new(FlushLatch::new());
        let id = StreamId::new();

        let stream = Self {
            id,
            conversation_id: conversation_id.clone(),
            tx,
            latch: Arc::clone(&latch),
            registered_at: Instant::now(),
        };
        let handle = InboxHandle {
            id,
            conversation_id,
            rx,
            latch,
        };
        (stream, handle)
    }

    /// Stream id
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Conversation this stream serves
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Flush latch of this stream
    #[must_use]
    pub fn latch(&self) -> &FlushLatch {
        &self.latch
    }

    /// Sender used for replay and live delivery
    pub(crate) fn sender(&self) -> &mpsc::Sender<String> {
        &self.tx
    }

    /// Whether the reader half is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Seconds since registration
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.registered_at.elapsed().as_secs()
    }
}

/// Reader half of a registered connection, owned by the transport
#[derive(Debug)]
pub struct InboxHandle {
    id: StreamId,
    conversation_id: ConversationId,
    rx: mpsc::Receiver<String>,
    latch: Arc<FlushLatch>,
}

impl InboxHandle {
    /// Stream id this handle reads from
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Conversation this handle serves
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Whether the pre-registration buffer has been fully replayed
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.latch.is_fired()
    }

    /// Wait for the replay of the pre-registration buffer to finish
    pub async fn flushed(&self) {
        self.latch.wait().await;
    }

    /// Receive the next display message
    ///
    /// Returns `None` once the stream has been unregistered or replaced and
    /// every queued message has been taken.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take a message if one is ready
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
