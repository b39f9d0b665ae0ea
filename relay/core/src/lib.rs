//! Relay Core - Live Fragment Delivery for the Finance Chat Backend
//!
//! Assistant replies are generated out of process and arrive as ordered
//! fragments on a partitioned log. This crate moves each fragment to the
//! browser connection watching its conversation, buffering fragments that
//! arrive before anyone is watching and replaying them, in order, on connect.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Partitioned log (FragmentLog)                 │
//! └──────────────┬──────────────────┬──────────────────┬─────────────┘
//!                │ partition 0      │ partition 1      │ partition N-1
//! ┌──────────────┴──────────────────┴──────────────────┴─────────────┐
//! │                          WorkerPool                               │
//! │     queue+worker          queue+worker          queue+worker      │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ route(fragment)
//! ┌──────────────────────────────┴───────────────────────────────────┐
//! │                         StreamRegistry                            │
//! │   pending buffers ──register──► replay ──► FlushLatch ──► live    │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ InboxHandle
//! ┌──────────────────────────────┴───────────────────────────────────┐
//! │                 SseAdapter  →  data: {"message": ...}             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Fragment`]: one chunk of assistant output, decoded from the log
//! - [`WorkerPool`]: one ordered worker per log partition
//! - [`StreamRegistry`]: routes fragments to live inboxes or pending buffers
//! - [`SseAdapter`]: drains an inbox into server-sent events
//! - [`MetricsCollector`]: counters behind the status endpoint
//! - [`RelayConfig`]: TOML + environment configuration
//!
//! # Delivery Guarantees
//!
//! - Fragments of one partition reach the registry in log order
//! - A connection sees buffered fragments before live ones
//! - Live delivery is at-most-once; a full inbox drops instead of blocking
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{bootstrap, ingest, ChannelLog, SseAdapter, StreamRegistry};
//!
//! let registry = StreamRegistry::new();
//! let (mut log, producer) = ChannelLog::new(4, 1024);
//! let pool = bootstrap(&log, Default::default(), Arc::new(registry.clone())).await?;
//! tokio::spawn(async move { ingest(&mut log, &pool).await });
//!
//! let adapter = SseAdapter::new(registry);
//! let inbox = adapter.connect("c1");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod fragment;
pub mod log;
pub mod metrics;
pub mod pool;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig,
};
pub use fragment::{resolve, ConversationId, Fragment, FragmentError, DONE_SENTINEL, ERROR_SENTINEL};
pub use log::{bootstrap, ingest, ChannelLog, FragmentLog, LogError, LogProducer, LogRecord};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use pool::{FragmentSink, PoolConfig, SubmitOutcome, WorkerPool};
pub use streaming::{
    BufferOverflowPolicy, FlushLatch, InboxHandle, RouteOutcome, SinkPolicy, StreamRegistry,
    StreamRegistryConfig, TerminalPolicy,
};
pub use transport::{ChannelSink, DrainOutcome, DrainReport, EventSink, SseAdapter, TransportError};
