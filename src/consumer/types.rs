use crate::error::CheckpointError;
use crate::monitoring::ProcessingEvent;
use crate::store::CheckpointStore;
use aws_sdk_kinesis::types::Record;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Passed to a processor once, before any records are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationInput {
    pub shard_id: String,
    /// Checkpoint the shard resumes after, if one was stored
    pub extended_sequence_number: Option<String>,
}

/// One batch of records for a processor
#[derive(Debug, Clone)]
pub struct ProcessRecordsInput {
    pub records: Vec<Record>,
    pub checkpointer: Checkpointer,
    /// How far the batch trails the tip of the shard
    pub millis_behind_latest: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ShutdownInput {
    pub checkpointer: Checkpointer,
    pub reason: ShutdownReason,
}

/// Why a processor is being shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// The shard was closed and read to its end. Checkpoint to finish it.
    Terminate,
    /// The worker gave up the shard after an unrecoverable fault. Checkpointing
    /// is disabled.
    Zombie,
    /// The worker is shutting down
    Requested,
}

/// Saves progress for one shard.
///
/// Clones share state, so a checkpoint made through the clone handed to a
/// processor is visible to the worker.
#[derive(Clone)]
pub struct Checkpointer {
    shard_id: String,
    store: Arc<dyn CheckpointStore>,
    last_delivered: Arc<Mutex<Option<String>>>,
    last_saved: Arc<Mutex<Option<String>>>,
    enabled: bool,
    monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
}

impl fmt::Debug for Checkpointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpointer")
            .field("shard_id", &self.shard_id)
            .field("last_delivered", &*self.last_delivered.lock())
            .field("last_saved", &*self.last_saved.lock())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Checkpointer {
    pub fn new(shard_id: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            shard_id: shard_id.into(),
            store,
            last_delivered: Arc::new(Mutex::new(None)),
            last_saved: Arc::new(Mutex::new(None)),
            enabled: true,
            monitoring_tx: None,
        }
    }

    pub(crate) fn with_monitoring(mut self, tx: Option<mpsc::Sender<ProcessingEvent>>) -> Self {
        self.monitoring_tx = tx;
        self
    }

    /// Seeds the checkpoint the shard resumed from
    pub(crate) fn with_last_checkpoint(self, sequence_number: Option<String>) -> Self {
        *self.last_saved.lock() = sequence_number;
        self
    }

    /// A handle sharing this one's state that refuses to save
    pub(crate) fn disabled(&self) -> Self {
        Self {
            enabled: false,
            ..self.clone()
        }
    }

    pub(crate) fn set_last_delivered(&self, sequence_number: &str) {
        *self.last_delivered.lock() = Some(sequence_number.to_string());
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Sequence number of the newest record handed to the processor
    pub fn last_delivered(&self) -> Option<String> {
        self.last_delivered.lock().clone()
    }

    /// Sequence number of the last successful checkpoint
    pub fn last_checkpoint(&self) -> Option<String> {
        self.last_saved.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checkpoints at the newest record delivered so far
    pub async fn checkpoint(&self) -> Result<(), CheckpointError> {
        let sequence_number = self
            .last_delivered()
            .ok_or_else(|| CheckpointError::NothingToCheckpoint(self.shard_id.clone()))?;
        self.checkpoint_at(&sequence_number).await
    }

    pub async fn checkpoint_at(&self, sequence_number: &str) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Err(CheckpointError::Disabled(self.shard_id.clone()));
        }
        if sequence_number.is_empty() {
            return Err(CheckpointError::InvalidData(
                "sequence number must not be empty".to_string(),
            ));
        }

        match self.store.save_checkpoint(&self.shard_id, sequence_number).await {
            Ok(()) => {
                *self.last_saved.lock() = Some(sequence_number.to_string());
                debug!(shard_id = %self.shard_id, sequence = %sequence_number, "Checkpoint saved");
                self.send_event(ProcessingEvent::checkpoint(
                    self.shard_id.clone(),
                    sequence_number.to_string(),
                    true,
                    None,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    shard_id = %self.shard_id,
                    sequence = %sequence_number,
                    error = %e,
                    "Failed to save checkpoint"
                );
                self.send_event(ProcessingEvent::checkpoint(
                    self.shard_id.clone(),
                    sequence_number.to_string(),
                    false,
                    Some(e.to_string()),
                ))
                .await;
                Err(CheckpointError::SaveFailed(e.to_string()))
            }
        }
    }

    async fn send_event(&self, event: ProcessingEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.send(event).await {
                warn!(error = %e, "Failed to send monitoring event");
            }
        }
    }
}
