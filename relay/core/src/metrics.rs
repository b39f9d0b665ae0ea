//! Pipeline Metrics
//!
//! Counters and gauges for the worker pool:
//! - Fragments processed and dropped
//! - Cumulative processing time (average derived on snapshot)
//! - Queue depth per partition
//! - Live worker count
//!
//! All values live behind one mutex so a [`MetricsSnapshot`] is always
//! internally consistent.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

// ============================================================================
// Collector
// ============================================================================

#[derive(Debug, Default)]
struct MetricsState {
    processed: u64,
    dropped: u64,
    total_processing: Duration,
    buffer_levels: Vec<u64>,
    active_workers: u64,
}

/// Thread-safe metrics for one worker pool
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    /// Create a collector tracking `partitions` queues
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        Self {
            state: Mutex::new(MetricsState {
                buffer_levels: vec![0; partitions],
                ..Default::default()
            }),
        }
    }

    /// Count one successfully routed fragment and its processing time
    pub fn record_processed(&self, elapsed: Duration) {
        let mut state = self.state.lock();
        state.processed += 1;
        state.total_processing += elapsed;
    }

    /// Count one dropped fragment
    pub fn record_dropped(&self) {
        self.state.lock().dropped += 1;
    }

    /// A payload entered the queue of `partition`
    pub fn queue_inc(&self, partition: usize) {
        if let Some(level) = self.state.lock().buffer_levels.get_mut(partition) {
            *level += 1;
        }
    }

    /// A payload left the queue of `partition`
    pub fn queue_dec(&self, partition: usize) {
        if let Some(level) = self.state.lock().buffer_levels.get_mut(partition) {
            *level = level.saturating_sub(1);
        }
    }

    /// A worker started
    pub fn worker_started(&self) {
        self.state.lock().active_workers += 1;
    }

    /// A worker exited
    pub fn worker_stopped(&self) {
        let mut state = self.state.lock();
        state.active_workers = state.active_workers.saturating_sub(1);
    }

    /// Consistent point-in-time view of every value
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let avg_processing_ms = if state.processed == 0 {
            0.0
        } else {
            state.total_processing.as_secs_f64() * 1000.0 / state.processed as f64
        };

        MetricsSnapshot {
            messages_processed: state.processed,
            messages_dropped: state.dropped,
            avg_processing_ms,
            buffer_levels: state.buffer_levels.clone(),
            active_workers: state.active_workers,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Serializable status view, as served on the metrics endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Fragments decoded and routed
    pub messages_processed: u64,
    /// Fragments lost to invalid partitions, decode failures, stopped pools,
    /// buffer overflow or full/closed inboxes
    pub messages_dropped: u64,
    /// Mean processing time per processed fragment, milliseconds
    pub avg_processing_ms: f64,
    /// Current depth of each partition queue
    pub buffer_levels: Vec<u64>,
    /// Workers currently running
    pub active_workers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsCollector::new(3);
        let snap = metrics.snapshot();
        assert_eq!(snap.messages_processed, 0);
        assert_eq!(snap.messages_dropped, 0);
        assert_eq!(snap.avg_processing_ms, 0.0);
        assert_eq!(snap.buffer_levels, vec![0, 0, 0]);
        assert_eq!(snap.active_workers, 0);
    }

    #[test]
    fn test_average_processing_time() {
        let metrics = MetricsCollector::new(1);
        metrics.record_processed(Duration::from_millis(10));
        metrics.record_processed(Duration::from_millis(30));
        let snap = metrics.snapshot();
        assert_eq!(snap.messages_processed, 2);
        assert!((snap.avg_processing_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_queue_gauges() {
        let metrics = MetricsCollector::new(2);
        metrics.queue_inc(1);
        metrics.queue_inc(1);
        metrics.queue_dec(1);
        metrics.queue_dec(0);
        // Out-of-range partitions are ignored.
        metrics.queue_inc(9);
        assert_eq!(metrics.snapshot().buffer_levels, vec![0, 1]);
    }

    #[test]
    fn test_worker_count() {
        let metrics = MetricsCollector::new(1);
        metrics.worker_started();
        metrics.worker_started();
        metrics.worker_stopped();
        assert_eq!(metrics.snapshot().active_workers, 1);
        metrics.worker_stopped();
        metrics.worker_stopped();
        assert_eq!(metrics.snapshot().active_workers, 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let metrics = MetricsCollector::new(2);
        metrics.record_dropped();
        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "active_workers",
                "avg_processing_ms",
                "buffer_levels",
                "messages_dropped",
                "messages_processed",
            ]
        );
        assert_eq!(value["messages_dropped"], 1);
        assert_eq!(value["buffer_levels"], serde_json::json!([0, 0]));
    }
}
