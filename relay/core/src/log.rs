//! Partitioned Log Seam
//!
//! The relay consumes fragments from an ordered, partitioned log. The pool is
//! sized from the log's partition count once at startup; a topology change
//! needs a restart.
//!
//! # Partition Affinity
//!
//! Buffered-before-live ordering only holds when every fragment of one
//! conversation lands on the same partition. [`LogProducer::produce_keyed`]
//! provides that by hashing the conversation id; producers that pick
//! partitions themselves must do the same.
//!
//! # Example
//!
//! ```ignore
//! let (mut log, producer) = ChannelLog::new(4, 1024);
//! let pool = bootstrap(&log, PoolConfig::default(), Arc::new(registry)).await?;
//! tokio::spawn(async move { ingest(&mut log, &pool).await });
//!
//! producer.produce_keyed(&"c1".into(), payload).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::fragment::ConversationId;
use crate::pool::{FragmentSink, PoolConfig, SubmitOutcome, WorkerPool};

/// One raw record read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record was read from
    pub partition: i32,
    /// Raw fragment payload
    pub payload: Bytes,
}

/// Errors from the log seam
#[derive(Debug, Error)]
pub enum LogError {
    /// The log reported no partitions
    #[error("log has no partitions")]
    NoPartitions,

    /// The log's consuming side is gone
    #[error("log is closed")]
    Closed,
}

/// Source of ordered fragment payloads
///
/// Records of one partition must be yielded in their log order.
#[async_trait]
pub trait FragmentLog: Send + Sync {
    /// Number of partitions of the topic
    async fn partition_count(&self) -> Result<usize, LogError>;

    /// Next record, or `None` once the log is closed
    async fn next_record(&mut self) -> Option<LogRecord>;
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Size a worker pool from the log topology and start it
///
/// # Errors
///
/// Returns [`LogError::NoPartitions`] for an empty topic, or whatever the log
/// reports when its metadata cannot be read.
pub async fn bootstrap<L>(
    log: &L,
    config: PoolConfig,
    sink: Arc<dyn FragmentSink>,
) -> Result<WorkerPool, LogError>
where
    L: FragmentLog + ?Sized,
{
    let partitions = log.partition_count().await?;
    if partitions == 0 {
        return Err(LogError::NoPartitions);
    }

    tracing::info!(partitions, "Sizing worker pool from log topology");
    Ok(WorkerPool::start(partitions, config, sink))
}

/// Counters for one [`ingest`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records read from the log
    pub records: u64,
    /// Records queued for a worker
    pub enqueued: u64,
    /// Records dropped for an invalid partition
    pub invalid: u64,
}

/// Pump records from `log` into `pool` until either side stops
///
/// Waits on [`WorkerPool::submit`], so a full partition queue holds back the
/// log reader.
pub async fn ingest<L>(log: &mut L, pool: &WorkerPool) -> IngestStats
where
    L: FragmentLog + ?Sized,
{
    let mut stats = IngestStats::default();

    while let Some(record) = log.next_record().await {
        stats.records += 1;
        match pool.submit(record.payload, record.partition).await {
            SubmitOutcome::Enqueued => stats.enqueued += 1,
            SubmitOutcome::InvalidPartition => stats.invalid += 1,
            SubmitOutcome::Stopped => {
                tracing::debug!("Pool stopped, ending ingestion");
                break;
            }
        }
    }

    tracing::info!(
        records = stats.records,
        enqueued = stats.enqueued,
        invalid = stats.invalid,
        "Ingestion finished"
    );
    stats
}

// ============================================================================
// In-process log
// ============================================================================

/// In-process partitioned log backed by a bounded channel
///
/// Records keep their global production order, which implies per-partition
/// order.
#[derive(Debug)]
pub struct ChannelLog {
    partitions: usize,
    rx: mpsc::Receiver<LogRecord>,
}

impl ChannelLog {
    /// Create a log with `partitions` partitions and its producer
    #[must_use]
    pub fn new(partitions: usize, capacity: usize) -> (Self, LogProducer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { partitions, rx },
            LogProducer { partitions, tx },
        )
    }
}

#[async_trait]
impl FragmentLog for ChannelLog {
    async fn partition_count(&self) -> Result<usize, LogError> {
        Ok(self.partitions)
    }

    async fn next_record(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }
}

/// Writing side of a [`ChannelLog`]
#[derive(Debug, Clone)]
pub struct LogProducer {
    partitions: usize,
    tx: mpsc::Sender<LogRecord>,
}

impl LogProducer {
    /// Number of partitions records are spread over
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition a conversation's records are keyed to
    #[must_use]
    pub fn partition_for(&self, conversation_id: &ConversationId) -> i32 {
        partition_for_key(conversation_id.as_str().as_bytes(), self.partitions)
    }

    /// Append a record keyed by conversation id
    ///
    /// Every record for the same conversation goes to the same partition.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if the log was dropped.
    pub async fn produce_keyed(
        &self,
        conversation_id: &ConversationId,
        payload: impl Into<Bytes>,
    ) -> Result<i32, LogError> {
        let partition = self.partition_for(conversation_id);
        self.produce(partition, payload).await?;
        Ok(partition)
    }

    /// Append a record to an explicit partition
    ///
    /// The partition is not validated here; the worker pool drops records
    /// for partitions it does not serve.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if the log was dropped.
    pub async fn produce(&self, partition: i32, payload: impl Into<Bytes>) -> Result<(), LogError> {
        self.tx
            .send(LogRecord {
                partition,
                payload: payload.into(),
            })
            .await
            .map_err(|_| LogError::Closed)
    }
}

/// Stable key to partition mapping
#[must_use]
pub fn partition_for_key(key: &[u8], partitions: usize) -> i32 {
    if partitions == 0 {
        return 0;
    }
    let index = crc32fast::hash(key) as usize % partitions;
    i32::try_from(index).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::fragment::Fragment;
    use crate::streaming::StreamRegistry;

    struct EmptyTopic;

    #[async_trait]
    impl FragmentLog for EmptyTopic {
        async fn partition_count(&self) -> Result<usize, LogError> {
            Ok(0)
        }

        async fn next_record(&mut self) -> Option<LogRecord> {
            None
        }
    }

    #[test]
    fn test_keyed_partition_is_stable() {
        let (_log, producer) = ChannelLog::new(8, 16);
        let id = ConversationId::new("conversation-42");
        let first = producer.partition_for(&id);
        for _ in 0..10 {
            assert_eq!(producer.partition_for(&id), first);
        }
        assert!((0..8).contains(&first));
    }

    #[test]
    fn test_partition_for_key_spreads() {
        let hit: std::collections::HashSet<i32> = (0..200)
            .map(|i| partition_for_key(format!("c{i}").as_bytes(), 4))
            .collect();
        assert_eq!(hit.len(), 4);
    }

    #[tokio::test]
    async fn test_bootstrap_sizes_pool() {
        let (log, _producer) = ChannelLog::new(3, 16);
        let pool = bootstrap(&log, PoolConfig::default(), Arc::new(StreamRegistry::new()))
            .await
            .unwrap();
        assert_eq!(pool.partitions(), 3);
        assert_eq!(pool.snapshot().buffer_levels.len(), 3);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_empty_topic() {
        let result = bootstrap(
            &EmptyTopic,
            PoolConfig::default(),
            Arc::new(StreamRegistry::new()),
        )
        .await;
        assert!(matches!(result, Err(LogError::NoPartitions)));
    }

    #[tokio::test]
    async fn test_ingest_until_log_closes() {
        let registry = StreamRegistry::new();
        let (mut log, producer) = ChannelLog::new(2, 16);
        let pool = bootstrap(&log, PoolConfig::default(), Arc::new(registry.clone()))
            .await
            .unwrap();

        let id = ConversationId::new("c1");
        for text in ["a", "b"] {
            producer
                .produce_keyed(&id, Fragment::text("c1", text).encode().unwrap())
                .await
                .unwrap();
        }
        producer.produce(7, Bytes::from_static(b"{}")).await.unwrap();
        drop(producer);

        let stats = ingest(&mut log, &pool).await;
        assert_eq!(
            stats,
            IngestStats {
                records: 3,
                enqueued: 2,
                invalid: 1,
            }
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.buffered_len(&id), 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_produce_after_log_dropped() {
        let (log, producer) = ChannelLog::new(1, 1);
        drop(log);
        assert!(matches!(
            producer.produce(0, Bytes::new()).await,
            Err(LogError::Closed)
        ));
    }
}
