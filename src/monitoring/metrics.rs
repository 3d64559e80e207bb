use super::types::{IteratorEventType, ProcessingEvent, ProcessingEventType, ShardEventType};
use crate::consumer::ShutdownReason;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

/// Rolled-up counters for a single shard
#[derive(Debug, Clone)]
pub struct ShardMetrics {
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub batches_failed: u64,
    pub retry_attempts: u64,
    pub processing_time: Duration,
    pub max_processing_time: Duration,

    pub checkpoints_succeeded: u64,
    pub checkpoints_failed: u64,

    pub iterator_renewals: u64,
    pub iterator_failures: u64,

    pub soft_errors: u64,
    pub hard_errors: u64,

    pub completed: bool,
    pub last_updated: Instant,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        Self {
            batches_delivered: 0,
            records_delivered: 0,
            batches_failed: 0,
            retry_attempts: 0,
            processing_time: Duration::ZERO,
            max_processing_time: Duration::ZERO,
            checkpoints_succeeded: 0,
            checkpoints_failed: 0,
            iterator_renewals: 0,
            iterator_failures: 0,
            soft_errors: 0,
            hard_errors: 0,
            completed: false,
            last_updated: Instant::now(),
        }
    }
}

impl ShardMetrics {
    pub fn avg_batch_time(&self) -> Duration {
        if self.batches_delivered == 0 {
            Duration::ZERO
        } else {
            self.processing_time.div_f64(self.batches_delivered as f64)
        }
    }
}

/// Consumes the worker's monitoring channel and logs per-shard metrics every
/// `window_duration`.
pub struct MetricsAggregator {
    metrics: HashMap<String, ShardMetrics>,
    window_duration: Duration,
    monitoring_rx: mpsc::Receiver<ProcessingEvent>,
}

impl MetricsAggregator {
    pub fn new(window_duration: Duration, monitoring_rx: mpsc::Receiver<ProcessingEvent>) -> Self {
        Self {
            metrics: HashMap::new(),
            window_duration,
            monitoring_rx,
        }
    }

    /// Runs until the worker drops its sender, then logs a final window and
    /// returns what was collected.
    pub async fn run(mut self) -> HashMap<String, ShardMetrics> {
        let mut interval = interval(self.window_duration);

        loop {
            tokio::select! {
                event = self.monitoring_rx.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
                _ = interval.tick() => self.emit_metrics(),
            }
        }

        self.emit_metrics();
        self.metrics
    }

    pub fn process_event(&mut self, event: ProcessingEvent) {
        let shard_id = event.shard_id;
        let m = self.metrics.entry(shard_id.clone()).or_default();

        match event.event_type {
            ProcessingEventType::BatchDelivered {
                record_count,
                attempts,
                duration,
            } => {
                m.batches_delivered += 1;
                m.records_delivered += record_count as u64;
                m.retry_attempts += u64::from(attempts.saturating_sub(1));
                m.processing_time += duration;
                m.max_processing_time = m.max_processing_time.max(duration);
                trace!(shard_id = %shard_id, records = record_count, "Batch delivered");
            }
            ProcessingEventType::BatchFailure {
                attempts,
                retriable,
                error,
                ..
            } => {
                m.batches_failed += 1;
                m.retry_attempts += u64::from(attempts.saturating_sub(1));
                if retriable {
                    m.soft_errors += 1;
                } else {
                    m.hard_errors += 1;
                }
                warn!(
                    shard_id = %shard_id,
                    error = %error,
                    attempts,
                    "Batch skipped after failure"
                );
            }
            ProcessingEventType::Checkpoint {
                sequence_number,
                success,
                error,
            } => {
                if success {
                    m.checkpoints_succeeded += 1;
                    trace!(
                        shard_id = %shard_id,
                        sequence = %sequence_number,
                        "Checkpoint successful"
                    );
                } else {
                    m.checkpoints_failed += 1;
                    warn!(
                        shard_id = %shard_id,
                        sequence = %sequence_number,
                        error = ?error,
                        "Checkpoint failed"
                    );
                }
            }
            ProcessingEventType::Iterator { event_type, error } => match event_type {
                IteratorEventType::Initial => {
                    trace!(shard_id = %shard_id, "Initial iterator acquired");
                }
                IteratorEventType::Renewed => m.iterator_renewals += 1,
                IteratorEventType::Expired => debug!(shard_id = %shard_id, "Iterator expired"),
                IteratorEventType::Failed => {
                    m.iterator_failures += 1;
                    warn!(shard_id = %shard_id, error = ?error, "Iterator operation failed");
                }
            },
            ProcessingEventType::ShardEvent {
                event_type,
                details,
            } => match event_type {
                ShardEventType::Completed => m.completed = true,
                ShardEventType::Error => {
                    m.hard_errors += 1;
                    warn!(shard_id = %shard_id, details = ?details, "Shard processing error");
                }
                ShardEventType::Interrupted => {
                    info!(shard_id = %shard_id, details = ?details, "Shard processing interrupted");
                }
                ShardEventType::Started | ShardEventType::Initialized => {}
            },
            ProcessingEventType::ProcessorShutdown { reason, error } => {
                if reason == ShutdownReason::Zombie {
                    warn!(shard_id = %shard_id, error = ?error, "Processor shut down as zombie");
                }
            }
        }

        m.last_updated = Instant::now();
    }

    fn emit_metrics(&mut self) {
        for (shard_id, m) in &self.metrics {
            if m.last_updated.elapsed() > self.window_duration * 2 {
                continue;
            }

            info!(
                shard_id = %shard_id,
                batches_delivered = m.batches_delivered,
                records_delivered = m.records_delivered,
                batches_failed = m.batches_failed,
                retry_attempts = m.retry_attempts,
                avg_batch_time_ms = %m.avg_batch_time().as_millis(),
                max_batch_time_ms = %m.max_processing_time.as_millis(),
                checkpoints_succeeded = m.checkpoints_succeeded,
                checkpoints_failed = m.checkpoints_failed,
                iterator_renewals = m.iterator_renewals,
                iterator_failures = m.iterator_failures,
                soft_errors = m.soft_errors,
                hard_errors = m.hard_errors,
                "Metrics for window"
            );
        }

        let stale_after = self.window_duration * 2;
        self.metrics
            .retain(|_, m| !m.completed || m.last_updated.elapsed() <= stale_after);
    }

    pub fn metrics(&self) -> &HashMap<String, ShardMetrics> {
        &self.metrics
    }

    pub fn shard_metrics(&self, shard_id: &str) -> Option<&ShardMetrics> {
        self.metrics.get(shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_roll_into_shard_metrics() {
        let (_tx, rx) = mpsc::channel(10);
        let mut aggregator = MetricsAggregator::new(Duration::from_secs(60), rx);

        aggregator.process_event(ProcessingEvent::batch_delivered(
            "shard-1",
            10,
            1,
            Duration::from_millis(20),
        ));
        aggregator.process_event(ProcessingEvent::batch_delivered(
            "shard-1",
            5,
            3,
            Duration::from_millis(40),
        ));
        aggregator.process_event(ProcessingEvent::batch_failure(
            "shard-1",
            2,
            1,
            false,
            "bad record".to_string(),
        ));
        aggregator.process_event(ProcessingEvent::checkpoint(
            "shard-1",
            "42".to_string(),
            true,
            None,
        ));
        aggregator.process_event(ProcessingEvent::iterator(
            "shard-2",
            IteratorEventType::Failed,
            Some("boom".to_string()),
        ));

        let m = aggregator.shard_metrics("shard-1").cloned().unwrap_or_default();
        assert_eq!(m.batches_delivered, 2);
        assert_eq!(m.records_delivered, 15);
        assert_eq!(m.retry_attempts, 2);
        assert_eq!(m.batches_failed, 1);
        assert_eq!(m.hard_errors, 1);
        assert_eq!(m.checkpoints_succeeded, 1);
        assert_eq!(m.max_processing_time, Duration::from_millis(40));
        assert_eq!(m.avg_batch_time(), Duration::from_millis(30));

        assert_eq!(aggregator.shard_metrics("shard-2").map(|m| m.iterator_failures), Some(1));
    }

    #[tokio::test]
    async fn test_run_returns_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(10);
        let aggregator = MetricsAggregator::new(Duration::from_secs(60), rx);
        let handle = tokio::spawn(aggregator.run());

        tx.send(ProcessingEvent::shard_event("shard-1", ShardEventType::Completed, None))
            .await
            .expect("aggregator should be receiving");
        drop(tx);

        let metrics = handle.await.expect("aggregator task should not panic");
        assert!(metrics.get("shard-1").is_some_and(|m| m.completed));
    }
}
