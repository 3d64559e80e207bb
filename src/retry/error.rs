use crate::error::{ProcessorError, ProducerError};
use thiserror::Error;

/// Why a [`RetryHandle`](super::RetryHandle) stopped trying
#[derive(Debug, Error)]
pub enum RetryError {
    /// Attempts made, and the last error seen
    #[error("Gave up after {0} attempts: {1}")]
    MaxRetriesExceeded(u32, String),

    #[error("Retry interrupted by shutdown signal")]
    Interrupted,
}

impl From<RetryError> for ProcessorError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::MaxRetriesExceeded(attempts, msg) => {
                ProcessorError::MaxRetriesExceeded(format!("After {} attempts: {}", attempts, msg))
            }
            RetryError::Interrupted => ProcessorError::Shutdown,
        }
    }
}

impl From<RetryError> for ProducerError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::MaxRetriesExceeded(attempts, message) => {
                ProducerError::RetriesExhausted { attempts, message }
            }
            RetryError::Interrupted => ProducerError::ShutDown,
        }
    }
}
