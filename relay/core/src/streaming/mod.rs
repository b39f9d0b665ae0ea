//! Streaming Infrastructure for Live Conversations
//!
//! Everything between a decoded fragment and a connection's inbox lives here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreamRegistry                             │
//! │  ┌──────────────────────┐      ┌─────────────────────────────┐   │
//! │  │  Live streams         │      │  Pending buffers             │   │
//! │  │  conv A → ClientStream│      │  conv B → [f1, f2, f3]       │   │
//! │  │  conv C → ClientStream│      │  conv D → [f1]               │   │
//! │  └──────────┬───────────┘      └──────────────┬──────────────┘   │
//! │             │                                  │ register(B)      │
//! │             │                                  ▼                  │
//! │             │                         replay → FlushLatch fires   │
//! └─────────────┼────────────────────────────────────────────────────┘
//!               ▼
//!         InboxHandle (read by the transport adapter)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay_core::streaming::StreamRegistry;
//! use relay_core::Fragment;
//!
//! let registry = StreamRegistry::new();
//! registry.route(Fragment::text("c1", "Hello")).await; // buffered
//!
//! let mut inbox = registry.register("c1");
//! assert_eq!(inbox.recv().await.as_deref(), Some("Hello"));
//! ```

mod client_stream;
mod latch;
mod registry;

pub use client_stream::{ClientStream, InboxHandle, StreamId};
pub use latch::FlushLatch;
pub use registry::{
    BufferOverflowPolicy, RegistrySummary, RouteOutcome, SinkPolicy, StreamRegistry,
    StreamRegistryConfig, TerminalPolicy,
};
