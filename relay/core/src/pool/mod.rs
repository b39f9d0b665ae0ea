//! Partition Worker Pool
//!
//! Turns N ordered log partitions into N independently scheduled workers.
//!
//! # Architecture
//!
//! ```text
//!   submit(payload, p)
//!          │  (Backpressure: waits for queue space)
//!          ▼
//!   ┌──────────────┐ ┌──────────────┐     ┌──────────────┐
//!   │ queue 0 [C]  │ │ queue 1 [C]  │ ... │ queue N-1 [C]│
//!   └──────┬───────┘ └──────┬───────┘     └──────┬───────┘
//!          ▼                ▼                    ▼
//!      worker 0         worker 1            worker N-1
//!          │ decode → FragmentSink::route → metrics
//!          ▼
//!    StreamRegistry   (DropWhenFull into live inboxes)
//! ```
//!
//! Each queue has exactly one consumer, so fragments of one partition reach
//! the sink in submission order.

mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fragment::Fragment;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::streaming::{RouteOutcome, SinkPolicy, StreamRegistry};

/// Destination of decoded fragments
///
/// Implemented by [`StreamRegistry`]; tests substitute recording sinks.
#[async_trait]
pub trait FragmentSink: Send + Sync + 'static {
    /// Route one fragment to its conversation
    async fn route(&self, fragment: Fragment) -> RouteOutcome;
}

#[async_trait]
impl FragmentSink for StreamRegistry {
    async fn route(&self, fragment: Fragment) -> RouteOutcome {
        StreamRegistry::route(self, fragment).await
    }
}

/// Worker pool configuration
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Capacity of every partition queue
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Policy applied when a partition queue is full
    pub const INGEST_POLICY: SinkPolicy = SinkPolicy::Backpressure;
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
        }
    }
}

/// Result of [`WorkerPool::submit`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Payload is queued for its partition worker
    Enqueued,
    /// Partition index outside the pool; payload dropped
    InvalidPartition,
    /// Pool stopped before the payload could be queued; payload dropped
    Stopped,
}

/// Fixed set of partition workers feeding a [`FragmentSink`]
pub struct WorkerPool {
    queues: Vec<tokio::sync::mpsc::Sender<Bytes>>,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Allocate `partitions` queues and spawn one worker per queue
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(partitions: usize, config: PoolConfig, sink: Arc<dyn FragmentSink>) -> Self {
        let metrics = Arc::new(MetricsCollector::new(partitions));
        let cancel = CancellationToken::new();
        let mut queues = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = tokio::sync::mpsc::channel(config.queue_capacity.max(1));
            queues.push(tx);
            workers.push(tokio::spawn(worker::run(worker::Worker {
                partition,
                queue: rx,
                sink: Arc::clone(&sink),
                metrics: Arc::clone(&metrics),
                cancel: cancel.clone(),
            })));
        }

        tracing::info!(
            partitions,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Self {
            queues,
            metrics,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Number of partitions served
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.queues.len()
    }

    /// Queue a raw payload for the worker of `partition`
    ///
    /// Out-of-range partitions (negative included) are dropped without
    /// waiting. Otherwise this waits for queue space, unless the pool stops
    /// first.
    pub async fn submit(&self, payload: impl Into<Bytes>, partition: i32) -> SubmitOutcome {
        let Some(index) = usize::try_from(partition)
            .ok()
            .filter(|&i| i < self.queues.len())
        else {
            self.metrics.record_dropped();
            tracing::error!(
                partition,
                partitions = self.queues.len(),
                "Invalid partition index, dropping payload"
            );
            return SubmitOutcome::InvalidPartition;
        };

        if self.cancel.is_cancelled() {
            self.metrics.record_dropped();
            return SubmitOutcome::Stopped;
        }

        let queue = &self.queues[index];
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = queue.reserve() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                // Gauge goes up before the worker can see the payload.
                self.metrics.queue_inc(index);
                permit.send(payload.into());
                SubmitOutcome::Enqueued
            }
            None => {
                self.metrics.record_dropped();
                tracing::debug!(partition = index, "Pool stopped while waiting for queue space");
                SubmitOutcome::Stopped
            }
        }
    }

    /// Shared metrics collector
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Consistent view of the pool's metrics
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether [`stop`](Self::stop) has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop every worker and wait for them to exit
    ///
    /// Workers finish the fragment they are processing; anything still queued
    /// is dropped. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::info!(partitions = self.queues.len(), "Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("partitions", &self.queues.len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}
