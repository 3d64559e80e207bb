//! Error types for the consumer worker, checkpointing, configuration and producers

use std::time::Duration;
use thiserror::Error;

use crate::client::KinesisClientError;

/// Main error type for worker operations
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Failed to get iterator: {0}")]
    GetIteratorFailed(String),

    #[error("Record processing attempt timed out after {0:?}")]
    ProcessingTimeout(Duration),

    #[error("Iterator expired for shard {0}")]
    IteratorExpired(String),

    #[error("Failed to get records: {0}")]
    GetRecordsFailed(String),

    #[error("Maximum retry attempts reached: {0}")]
    MaxRetriesExceeded(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Shard refresh error: {0}")]
    ShardRefreshError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Record processor failed for shard {shard_id}: {message}")]
    RecordProcessorFailed { shard_id: String, message: String },

    #[error("Shutdown requested")]
    Shutdown,
}

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Error returned by a record processor callback.
///
/// Soft failures are retried by the worker; hard failures are not. The wrapped
/// error is kept as-is so callers can downcast it back to its concrete type.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Soft failure (retriable): {0}")]
    SoftFailure(#[source] anyhow::Error),

    #[error("Hard failure (non-retriable): {0}")]
    HardFailure(#[source] anyhow::Error),
}

impl ProcessingError {
    pub fn soft(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::SoftFailure(err.into())
    }

    pub fn hard(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::HardFailure(err.into())
    }

    pub fn is_soft(&self) -> bool {
        matches!(self, ProcessingError::SoftFailure(_))
    }

    /// The underlying error, regardless of severity
    pub fn inner(&self) -> &anyhow::Error {
        match self {
            ProcessingError::SoftFailure(e) | ProcessingError::HardFailure(e) => e,
        }
    }
}

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to save checkpoint: {0}")]
    SaveFailed(String),

    #[error("Failed to retrieve checkpoint: {0}")]
    RetrieveFailed(String),

    #[error("Invalid checkpoint data: {0}")]
    InvalidData(String),

    #[error("No records have been delivered for shard {0}")]
    NothingToCheckpoint(String),

    #[error("Checkpointing is disabled for shard {0}")]
    Disabled(String),
}

impl From<CheckpointError> for ProcessorError {
    fn from(err: CheckpointError) -> Self {
        ProcessorError::CheckpointError(err.to_string())
    }
}

// A failed checkpoint inside a processor is worth another attempt.
impl From<CheckpointError> for ProcessingError {
    fn from(err: CheckpointError) -> Self {
        ProcessingError::soft(err)
    }
}

/// Error type for building consumer configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingKey(&'static str),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid value for option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ConfigError> for ProcessorError {
    fn from(err: ConfigError) -> Self {
        ProcessorError::ConfigError(err.to_string())
    }
}

/// Error type for producer operations
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Producer has been shut down")]
    ShutDown,

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] std::io::Error),

    #[error("Request to Kinesis failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error(transparent)]
    Kinesis(#[from] KinesisClientError),
}
