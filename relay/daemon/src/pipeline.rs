//! Pipeline Assembly
//!
//! Wires the relay core together from a [`RelayConfig`]:
//!
//! ```text
//!   HTTP producers ──► ChannelLog ──ingest──► WorkerPool ──► StreamRegistry
//!                                                                │
//!                                          sweep (idle buffers) ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_core::log::IngestStats;
use relay_core::{bootstrap, ingest, ChannelLog, LogProducer, RelayConfig, StreamRegistry, WorkerPool};

/// Running pipeline and its background tasks
pub struct Pipeline {
    /// Routing authority shared with the HTTP layer
    pub registry: StreamRegistry,
    /// Producer side of the in-process log
    pub producer: LogProducer,
    /// Partition workers
    pub pool: Arc<WorkerPool>,
    ingestion: JoinHandle<IngestStats>,
    sweeper: JoinHandle<()>,
    background: CancellationToken,
}

impl Pipeline {
    /// Build the registry and log, size the pool from the log and start
    /// ingestion plus the idle-buffer sweep
    pub async fn start(config: &RelayConfig) -> Result<Self> {
        let registry = StreamRegistry::with_config(config.registry_config());
        let (mut log, producer) = ChannelLog::new(config.partitions, config.producer_capacity);

        let pool = Arc::new(
            bootstrap(&log, config.pool_config(), Arc::new(registry.clone()))
                .await
                .context("Failed to start worker pool")?,
        );

        let ingestion = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { ingest(&mut log, &pool).await })
        };

        let background = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_idle_buffers(
            registry.clone(),
            config.buffer_idle_ttl,
            config.sweep_interval,
            background.clone(),
        ));

        info!(
            partitions = pool.partitions(),
            queue_capacity = config.queue_capacity,
            inbox_capacity = config.inbox_capacity,
            "Pipeline started"
        );

        Ok(Self {
            registry,
            producer,
            pool,
            ingestion,
            sweeper,
            background,
        })
    }

    /// Stop the pool, then wait for ingestion and the sweep to end
    ///
    /// Fragments still queued are dropped.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            producer,
            pool,
            ingestion,
            sweeper,
            background,
            ..
        } = self;

        drop(producer);
        background.cancel();
        pool.stop().await;

        let stats = ingestion.await.context("Ingestion task failed")?;
        sweeper.await.context("Sweep task failed")?;

        let snapshot = pool.snapshot();
        info!(
            records = stats.records,
            processed = snapshot.messages_processed,
            dropped = snapshot.messages_dropped,
            "Pipeline stopped"
        );
        Ok(())
    }
}

/// Periodically drop pending buffers nobody came back for
pub async fn sweep_idle_buffers(
    registry: StreamRegistry,
    idle_ttl: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let pruned = registry.prune_idle_buffers(idle_ttl);
                if pruned > 0 {
                    info!(pruned, "Pruned idle conversation buffers");
                } else {
                    debug!("No idle conversation buffers");
                }
            }
        }
    }
}
