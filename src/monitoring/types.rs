use crate::consumer::ShutdownReason;
use std::time::{Duration, SystemTime};

#[cfg(feature = "test-utils")]
use std::collections::HashSet;
#[cfg(feature = "test-utils")]
use tokio::sync::mpsc;
#[cfg(feature = "test-utils")]
use tracing::debug;

/// Configuration for the monitoring system
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    /// Whether the worker publishes events at all
    pub enabled: bool,
    /// Size of the monitoring channel buffer
    pub channel_size: usize,
    /// How often the aggregator logs rolled-up metrics
    pub metrics_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_size: 1000,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// Something that happened while the worker was consuming a shard
#[derive(Debug, Clone)]
pub struct ProcessingEvent {
    pub timestamp: SystemTime,
    pub shard_id: String,
    pub event_type: ProcessingEventType,
}

#[derive(Debug, Clone)]
pub enum ProcessingEventType {
    ShardEvent {
        event_type: ShardEventType,
        details: Option<String>,
    },
    /// The processor accepted a batch
    BatchDelivered {
        record_count: usize,
        attempts: u32,
        duration: Duration,
    },
    /// The processor rejected a batch and it was skipped
    BatchFailure {
        record_count: usize,
        attempts: u32,
        retriable: bool,
        error: String,
    },
    Checkpoint {
        sequence_number: String,
        success: bool,
        error: Option<String>,
    },
    Iterator {
        event_type: IteratorEventType,
        error: Option<String>,
    },
    ProcessorShutdown {
        reason: ShutdownReason,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEventType {
    /// A task was spawned for the shard
    Started,
    /// The record processor's init callback returned
    Initialized,
    /// The shard was read to its end
    Completed,
    Error,
    /// Processing stopped because shutdown was requested
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorEventType {
    Initial,
    Renewed,
    Expired,
    Failed,
}

impl ProcessingEvent {
    fn new(shard_id: impl Into<String>, event_type: ProcessingEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            shard_id: shard_id.into(),
            event_type,
        }
    }

    pub fn shard_event(
        shard_id: impl Into<String>,
        event_type: ShardEventType,
        details: Option<String>,
    ) -> Self {
        Self::new(shard_id, ProcessingEventType::ShardEvent { event_type, details })
    }

    pub fn batch_delivered(
        shard_id: impl Into<String>,
        record_count: usize,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::BatchDelivered {
                record_count,
                attempts,
                duration,
            },
        )
    }

    pub fn batch_failure(
        shard_id: impl Into<String>,
        record_count: usize,
        attempts: u32,
        retriable: bool,
        error: String,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::BatchFailure {
                record_count,
                attempts,
                retriable,
                error,
            },
        )
    }

    pub fn checkpoint(
        shard_id: impl Into<String>,
        sequence_number: String,
        success: bool,
        error: Option<String>,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::Checkpoint {
                sequence_number,
                success,
                error,
            },
        )
    }

    pub fn iterator(
        shard_id: impl Into<String>,
        event_type: IteratorEventType,
        error: Option<String>,
    ) -> Self {
        Self::new(shard_id, ProcessingEventType::Iterator { event_type, error })
    }

    pub fn processor_shutdown(
        shard_id: impl Into<String>,
        reason: ShutdownReason,
        error: Option<String>,
    ) -> Self {
        Self::new(shard_id, ProcessingEventType::ProcessorShutdown { reason, error })
    }
}

/// Collects events from a worker's monitoring channel under short string keys
/// so tests can wait for a set of them.
#[cfg(feature = "test-utils")]
#[derive(Debug)]
pub struct TestMonitoringHarness {
    monitoring_rx: mpsc::Receiver<ProcessingEvent>,
    events_seen: HashSet<String>,
    event_history: Vec<ProcessingEvent>,
}

#[cfg(feature = "test-utils")]
impl TestMonitoringHarness {
    pub fn new(monitoring_rx: mpsc::Receiver<ProcessingEvent>) -> Self {
        Self {
            monitoring_rx,
            events_seen: HashSet::new(),
            event_history: Vec::new(),
        }
    }

    /// Waits until every key in `expected` has been seen, or five seconds pass
    pub async fn wait_for_events(&mut self, expected: &[&str]) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        loop {
            if expected.iter().all(|e| self.events_seen.contains(*e)) {
                debug!(?expected, "All expected events seen");
                return Ok(());
            }

            match tokio::time::timeout_at(deadline, self.monitoring_rx.recv()).await {
                Ok(Some(event)) => self.record(event),
                Ok(None) => {
                    return Err(anyhow::anyhow!(
                        "Channel closed before seeing all events. Expected: {:?}, Seen: {:?}",
                        expected,
                        self.events_seen
                    ))
                }
                Err(_) => {
                    return Err(anyhow::anyhow!(
                        "Timeout waiting for events. Expected: {:?}, Seen: {:?}",
                        expected,
                        self.events_seen
                    ))
                }
            }
        }
    }

    fn record(&mut self, event: ProcessingEvent) {
        let key = match &event.event_type {
            ProcessingEventType::ShardEvent { event_type, .. } => match event_type {
                ShardEventType::Started => "shard_started".to_string(),
                ShardEventType::Initialized => "shard_initialized".to_string(),
                ShardEventType::Completed => "shard_completed".to_string(),
                ShardEventType::Error => "shard_error".to_string(),
                ShardEventType::Interrupted => "shard_interrupted".to_string(),
            },
            ProcessingEventType::BatchDelivered { record_count, .. } => {
                format!("batch_delivered_{}", record_count)
            }
            ProcessingEventType::BatchFailure { retriable, .. } => {
                if *retriable {
                    "batch_failure_soft".to_string()
                } else {
                    "batch_failure_hard".to_string()
                }
            }
            ProcessingEventType::Checkpoint {
                sequence_number,
                success,
                ..
            } => {
                let status = if *success { "success" } else { "failure" };
                format!("checkpoint_{}_{}", sequence_number, status)
            }
            ProcessingEventType::Iterator { event_type, .. } => match event_type {
                IteratorEventType::Initial => "iterator_initial".to_string(),
                IteratorEventType::Renewed => "iterator_renewed".to_string(),
                IteratorEventType::Expired => "iterator_expired".to_string(),
                IteratorEventType::Failed => "iterator_failed".to_string(),
            },
            ProcessingEventType::ProcessorShutdown { reason, .. } => {
                format!("shutdown_{:?}", reason).to_lowercase()
            }
        };

        self.events_seen.insert(key);
        self.event_history.push(event);
    }

    pub fn events_seen(&self) -> &HashSet<String> {
        &self.events_seen
    }

    pub fn event_history(&self) -> &[ProcessingEvent] {
        &self.event_history
    }
}
