//! Stream Registry - Conversation Routing and Buffering
//!
//! The registry is the single source of truth for where a conversation's next
//! fragment goes: either the live inbox of the registered connection, or the
//! pending buffer kept until a connection registers.
//!
//! # Architecture
//!
//! ```text
//!                        StreamRegistry
//!        ┌──────────────────────────────────────────────┐
//!        │ RwLock<RegistryState>                         │
//!        │   streams: ConversationId -> Arc<ClientStream>│
//!        │   buffers: ConversationId -> ConversationBuffer│
//!        └───────────────┬──────────────────────────────┘
//!                        │ route(fragment)
//!           ┌────────────┴────────────┐
//!           │                         │
//!     no stream registered      stream registered
//!           │                         │
//!   append / discard buffer    wait flush latch → try_send
//! ```
//!
//! # Ordering
//!
//! `register` detaches the pending buffer under the same write lock that
//! installs the stream, then replays it on a separate task and fires the
//! stream's flush latch. `route` waits on that latch before delivering, so a
//! live fragment can never overtake a replayed one. Together with per-partition
//! FIFO in the worker pool this gives buffered-before-live ordering for every
//! conversation whose fragments share a partition.
//!
//! # Locking
//!
//! The lock only guards map operations. It is never held across an `.await`
//! or a channel send.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;

use super::client_stream::{ClientStream, InboxHandle};
use crate::fragment::{ConversationId, Fragment};

// ============================================================================
// Configuration
// ============================================================================

/// Policy for a conversation buffer that reached its fragment limit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferOverflowPolicy {
    /// Evict the oldest buffered fragment (keeps the tail of the reply)
    #[default]
    DropOldest,
    /// Refuse the incoming fragment (keeps the head of the reply)
    DropNewest,
}

/// What happens to a pending buffer when a terminal fragment arrives and no
/// connection is registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Discard the buffer; nobody was watching so there is nothing to show
    #[default]
    Discard,
    /// Keep the buffer, terminal included, for a subscriber that connects late
    ///
    /// Retained buffers are reclaimed by [`StreamRegistry::prune_idle_buffers`].
    Retain,
}

/// How a sink behaves when it is full
///
/// Ingestion into partition queues applies backpressure; delivery into live
/// inboxes drops instead, so a stalled browser can never stall a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Suspend the sender until space frees
    Backpressure,
    /// Drop the item and report it
    DropWhenFull,
}

/// Configuration for the stream registry
#[derive(Clone, Debug)]
pub struct StreamRegistryConfig {
    /// Capacity of each connection inbox
    pub inbox_capacity: usize,
    /// Maximum fragments held per pending conversation buffer
    pub max_buffered_fragments: usize,
    /// Behaviour when a pending buffer is full
    pub overflow_policy: BufferOverflowPolicy,
    /// Behaviour when a reply ends with nobody watching
    pub terminal_policy: TerminalPolicy,
}

impl StreamRegistryConfig {
    /// Policy applied to live inbox delivery
    pub const DELIVERY_POLICY: SinkPolicy = SinkPolicy::DropWhenFull;
}

impl Default for StreamRegistryConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 100,
            max_buffered_fragments: 1000,
            overflow_policy: BufferOverflowPolicy::DropOldest,
            terminal_policy: TerminalPolicy::Discard,
        }
    }
}

// ============================================================================
// Routing outcomes
// ============================================================================

/// Result of routing one fragment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered into the live inbox
    Delivered,
    /// Appended to the pending buffer
    Buffered {
        /// Fragments lost to the overflow policy (0 or 1)
        evicted: usize,
    },
    /// Terminal fragment with nobody watching; the pending buffer was dropped
    BufferDiscarded {
        /// Number of buffered fragments that were dropped
        fragments: usize,
    },
    /// Live inbox was full; the message was dropped
    InboxFull,
    /// Live inbox was closed by its reader; the message was dropped
    InboxClosed,
}

impl RouteOutcome {
    /// Whether the routed fragment itself was lost
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::InboxFull | Self::InboxClosed)
    }

    /// Fragments lost to the buffer overflow policy while routing
    #[must_use]
    pub fn evicted(&self) -> usize {
        match self {
            Self::Buffered { evicted } => *evicted,
            _ => 0,
        }
    }
}

// ============================================================================
// Conversation buffer
// ============================================================================

/// Ordered fragments for a conversation with no registered connection
#[derive(Debug)]
struct ConversationBuffer {
    fragments: VecDeque<Fragment>,
    created_at: Instant,
    last_appended: Instant,
}

impl ConversationBuffer {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            fragments: VecDeque::new(),
            created_at: now,
            last_appended: now,
        }
    }

    /// Append respecting the limit; returns how many fragments were lost
    fn push(&mut self, fragment: Fragment, limit: usize, policy: BufferOverflowPolicy) -> usize {
        self.last_appended = Instant::now();
        if self.fragments.len() < limit {
            self.fragments.push_back(fragment);
            return 0;
        }
        match policy {
            BufferOverflowPolicy::DropOldest => {
                self.fragments.pop_front();
                self.fragments.push_back(fragment);
            }
            BufferOverflowPolicy::DropNewest => {}
        }
        1
    }

    fn len(&self) -> usize {
        self.fragments.len()
    }

    fn idle_for(&self) -> Duration {
        self.last_appended.elapsed()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    streams: HashMap<ConversationId, Arc<ClientStream>>,
    buffers: HashMap<ConversationId, ConversationBuffer>,
}

/// Routing and buffering authority for live conversations
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RwLock<RegistryState>>,
    config: Arc<StreamRegistryConfig>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    /// Create a registry with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StreamRegistryConfig::default())
    }

    /// Create a registry with custom configuration
    #[must_use]
    pub fn with_config(config: StreamRegistryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
            config: Arc::new(config),
        }
    }

    /// Registry configuration
    #[must_use]
    pub fn config(&self) -> &StreamRegistryConfig {
        &self.config
    }

    /// Register a connection for a conversation
    ///
    /// Installs a new stream, replacing any previous one for the same id, and
    /// detaches the pending buffer. The buffer is replayed into the new inbox
    /// in its original order on a spawned task, after which the flush latch
    /// fires. With nothing buffered the latch fires before this returns.
    ///
    /// The inbox holds at least the whole pending buffer.
    ///
    /// Must be called from within a Tokio runtime when a buffer is pending.
    pub fn register(&self, conversation_id: impl Into<ConversationId>) -> InboxHandle {
        let conversation_id = conversation_id.into();

        let (stream, handle, previous, pending) = {
            let mut state = self.inner.write();
            let pending = state.buffers.remove(&conversation_id);
            // Room for the whole replay, so it completes without a reader and
            // routing never waits on a stalled connection.
            let capacity = pending
                .as_ref()
                .map_or(0, ConversationBuffer::len)
                .max(self.config.inbox_capacity);
            let (stream, handle) = ClientStream::channel(conversation_id.clone(), capacity);
            let stream = Arc::new(stream);
            let previous = state
                .streams
                .insert(conversation_id.clone(), Arc::clone(&stream));
            (stream, handle, previous, pending)
        };

        if let Some(previous) = previous {
            tracing::info!(
                conversation_id = %conversation_id,
                previous = %previous.id(),
                stream_id = %stream.id(),
                "Replacing existing stream for conversation"
            );
        }

        match pending {
            Some(buffer) if buffer.len() > 0 => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    stream_id = %stream.id(),
                    buffered = buffer.len(),
                    "Stream registered, replaying buffered fragments"
                );
                tokio::spawn(replay(stream, buffer.fragments));
            }
            _ => {
                stream.latch().fire();
                tracing::info!(
                    conversation_id = %conversation_id,
                    stream_id = %stream.id(),
                    "Stream registered"
                );
            }
        }

        handle
    }

    /// Route a decoded fragment to its conversation
    ///
    /// With no registered stream the fragment is buffered, or the buffer is
    /// discarded when the fragment is terminal (see [`TerminalPolicy`]). With a
    /// registered stream this waits for the stream's one-time replay, then
    /// delivers without blocking; a full inbox drops the message.
    pub async fn route(&self, fragment: Fragment) -> RouteOutcome {
        let id = fragment.conversation_id.clone();

        let existing = self.inner.read().streams.get(&id).cloned();
        let stream = match existing {
            Some(stream) => stream,
            None => {
                let mut state = self.inner.write();
                // A register may have won the race between the two locks.
                match state.streams.get(&id).cloned() {
                    Some(stream) => stream,
                    None => return self.park(&mut state, fragment),
                }
            }
        };

        stream.latch().wait().await;

        let message = fragment.display();
        match stream.sender().try_send(message) {
            Ok(()) => {
                tracing::debug!(
                    conversation_id = %id,
                    stream_id = %stream.id(),
                    terminal = fragment.last_message,
                    "Delivered fragment to stream"
                );
                RouteOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conversation_id = %id,
                    stream_id = %stream.id(),
                    "Client inbox is full, dropping message"
                );
                RouteOutcome::InboxFull
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    conversation_id = %id,
                    stream_id = %stream.id(),
                    "Client inbox closed, dropping message"
                );
                RouteOutcome::InboxClosed
            }
        }
    }

    /// Buffer or discard a fragment for an unwatched conversation
    ///
    /// Called with the write lock held.
    fn park(&self, state: &mut RegistryState, fragment: Fragment) -> RouteOutcome {
        let id = fragment.conversation_id.clone();

        if fragment.is_terminal() && self.config.terminal_policy == TerminalPolicy::Discard {
            let fragments = state.buffers.remove(&id).map_or(0, |b| b.len());
            tracing::info!(
                conversation_id = %id,
                discarded = fragments,
                "Reply finished with no stream registered, discarding buffer"
            );
            return RouteOutcome::BufferDiscarded { fragments };
        }

        let buffer = state
            .buffers
            .entry(id.clone())
            .or_insert_with(ConversationBuffer::new);
        let evicted = buffer.push(
            fragment,
            self.config.max_buffered_fragments,
            self.config.overflow_policy,
        );

        if evicted > 0 {
            tracing::warn!(
                conversation_id = %id,
                policy = ?self.config.overflow_policy,
                limit = self.config.max_buffered_fragments,
                "Conversation buffer full"
            );
        } else {
            tracing::debug!(
                conversation_id = %id,
                buffered = buffer.len(),
                "Buffered fragment, no stream registered yet"
            );
        }

        RouteOutcome::Buffered { evicted }
    }

    /// Remove the stream and any pending buffer for a conversation
    ///
    /// A later registration starts from an empty buffer. Returns `true` if a
    /// stream was registered.
    pub fn unregister(&self, conversation_id: &ConversationId) -> bool {
        let (stream, buffer) = {
            let mut state = self.inner.write();
            (
                state.streams.remove(conversation_id),
                state.buffers.remove(conversation_id),
            )
        };

        if stream.is_some() || buffer.is_some() {
            tracing::info!(
                conversation_id = %conversation_id,
                discarded = buffer.as_ref().map_or(0, ConversationBuffer::len),
                "Stream unregistered"
            );
        }
        stream.is_some()
    }

    /// Unregister the stream behind `handle` if it is still the current one
    ///
    /// A connection that was replaced by a newer registration must not tear
    /// down its successor. Returns `true` if the stream was removed.
    pub fn release(&self, handle: &InboxHandle) -> bool {
        let conversation_id = handle.conversation_id();
        let removed = {
            let mut state = self.inner.write();
            let current = state
                .streams
                .get(conversation_id)
                .is_some_and(|s| s.id() == handle.id());
            if current {
                state.streams.remove(conversation_id);
                state.buffers.remove(conversation_id);
            }
            current
        };

        if removed {
            tracing::info!(
                conversation_id = %conversation_id,
                stream_id = %handle.id(),
                "Stream released"
            );
        } else {
            tracing::debug!(
                conversation_id = %conversation_id,
                stream_id = %handle.id(),
                "Stream already replaced or removed"
            );
        }
        removed
    }

    /// Drop pending buffers that have not grown for at least `idle`
    ///
    /// Returns the number of buffers removed.
    pub fn prune_idle_buffers(&self, idle: Duration) -> usize {
        let mut state = self.inner.write();
        let before = state.buffers.len();

        state.buffers.retain(|id, buffer| {
            let keep = buffer.idle_for() < idle;
            if !keep {
                tracing::info!(
                    conversation_id = %id,
                    fragments = buffer.len(),
                    age_secs = buffer.created_at.elapsed().as_secs(),
                    "Pruning idle conversation buffer"
                );
            }
            keep
        });

        before - state.buffers.len()
    }

    /// Whether a stream is registered for the conversation
    #[must_use]
    pub fn is_registered(&self, conversation_id: &ConversationId) -> bool {
        self.inner.read().streams.contains_key(conversation_id)
    }

    /// Number of fragments pending for the conversation
    #[must_use]
    pub fn buffered_len(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .read()
            .buffers
            .get(conversation_id)
            .map_or(0, ConversationBuffer::len)
    }

    /// Snapshot of registry occupancy
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let state = self.inner.read();
        RegistrySummary {
            live_streams: state.streams.len(),
            pending_buffers: state.buffers.len(),
            buffered_fragments: state.buffers.values().map(ConversationBuffer::len).sum(),
        }
    }
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        f.debug_struct("StreamRegistry")
            .field("live_streams", &summary.live_streams)
            .field("pending_buffers", &summary.pending_buffers)
            .finish()
    }
}

/// Occupancy of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    /// Registered connections
    pub live_streams: usize,
    /// Conversations with pending fragments
    pub pending_buffers: usize,
    /// Total pending fragments
    pub buffered_fragments: usize,
}

/// Replay a detached buffer into a freshly registered stream
///
/// Fires the latch even when the reader went away mid-replay so routing
/// workers never wait on it forever.
async fn replay(stream: Arc<ClientStream>, fragments: VecDeque<Fragment>) {
    let total = fragments.len();
    let mut replayed = 0usize;

    for fragment in fragments {
        if stream.sender().send(fragment.display()).await.is_err() {
            tracing::debug!(
                conversation_id = %stream.conversation_id(),
                stream_id = %stream.id(),
                replayed,
                total,
                "Inbox closed during replay"
            );
            break;
        }
        replayed += 1;
    }

    stream.latch().fire();
    tracing::debug!(
        conversation_id = %stream.conversation_id(),
        stream_id = %stream.id(),
        replayed,
        "Buffer flushed"
    );
}
