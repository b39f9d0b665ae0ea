//! Partition worker loop

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::FragmentSink;
use crate::fragment::Fragment;
use crate::metrics::MetricsCollector;

/// Everything one worker owns
pub(super) struct Worker {
    pub partition: usize,
    pub queue: mpsc::Receiver<Bytes>,
    pub sink: Arc<dyn FragmentSink>,
    pub metrics: Arc<MetricsCollector>,
    pub cancel: CancellationToken,
}

/// Drain one partition queue until the pool stops
///
/// A payload that fails to decode is counted and skipped; the loop only ends
/// on cancellation. On exit every payload left in the queue is counted as
/// dropped.
pub(super) async fn run(mut worker: Worker) {
    let partition = worker.partition;
    worker.metrics.worker_started();
    tracing::debug!(partition, "Worker started");

    loop {
        let payload = tokio::select! {
            biased;
            () = worker.cancel.cancelled() => break,
            next = worker.queue.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };
        worker.metrics.queue_dec(partition);

        let started = Instant::now();
        let fragment = match Fragment::decode(&payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                worker.metrics.record_dropped();
                tracing::error!(partition, error = %e, "Failed to decode fragment");
                continue;
            }
        };

        let conversation_id = fragment.conversation_id.clone();
        let outcome = worker.sink.route(fragment).await;
        if outcome.is_dropped() {
            worker.metrics.record_dropped();
        } else {
            worker.metrics.record_processed(started.elapsed());
            for _ in 0..outcome.evicted() {
                worker.metrics.record_dropped();
            }
        }

        tracing::trace!(
            partition,
            conversation_id = %conversation_id,
            outcome = ?outcome,
            "Fragment routed"
        );
    }

    // Payloads still queued are lost with the pool. Closing first lets
    // submits holding a permit land before the drain ends.
    worker.queue.close();
    let mut discarded = 0usize;
    while worker.queue.recv().await.is_some() {
        worker.metrics.queue_dec(partition);
        worker.metrics.record_dropped();
        discarded += 1;
    }

    worker.metrics.worker_stopped();
    tracing::debug!(partition, discarded, "Worker stopped");
}
