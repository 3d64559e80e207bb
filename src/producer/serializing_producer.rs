use super::BatchSerializer;
use crate::client::{KinesisClientTrait, ProducerRecord, PutRecordOutput};
use crate::error::ProducerError;
use crate::retry::{FixedBackoff, RetryConfig, RetryHandle};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Feeds records through a [`BatchSerializer`] and puts every blob it emits
/// as a single record keyed by the blob's hash.
///
/// Not shareable between tasks; wrap it in a mutex if it must be.
pub struct SerializingProducer<C, S> {
    stream: String,
    client: C,
    serializer: S,
    retries: u32,
    retry_interval: Duration,
    shut_down: bool,
}

impl<C, S> SerializingProducer<C, S>
where
    C: KinesisClientTrait,
    S: BatchSerializer,
{
    pub fn new(stream: impl Into<String>, client: C, serializer: S) -> Self {
        Self {
            stream: stream.into(),
            client,
            serializer,
            retries: 5,
            retry_interval: Duration::from_secs(1),
            shut_down: false,
        }
    }

    /// Attempts per blob and the pause between them
    pub fn with_retries(mut self, retries: u32, retry_interval: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_interval = retry_interval;
        self
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Adds a record, putting a blob if the serializer produced one
    pub async fn put(&mut self, record: &[u8]) -> Result<Option<PutRecordOutput>, ProducerError> {
        if self.shut_down {
            return Err(ProducerError::ShutDown);
        }
        match self.serializer.write(record)? {
            Some(blob) => self.put_blob(blob).await.map(Some),
            None => Ok(None),
        }
    }

    /// Puts whatever the serializer is still holding
    pub async fn flush(&mut self) -> Result<Option<PutRecordOutput>, ProducerError> {
        match self.serializer.flush()? {
            Some(blob) => self.put_blob(blob).await.map(Some),
            None => Ok(None),
        }
    }

    /// Flushes pending data and refuses further records
    pub async fn shutdown(&mut self) -> Result<Option<PutRecordOutput>, ProducerError> {
        self.shut_down = true;
        self.flush().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    async fn put_blob(&self, blob: Bytes) -> Result<PutRecordOutput, ProducerError> {
        let record = ProducerRecord::new(partition_key(&blob), blob);
        let config = RetryConfig {
            max_retries: Some(self.retries),
            initial_backoff: self.retry_interval,
            max_backoff: self.retry_interval,
            jitter_factor: 0.0,
        };
        let mut retry = RetryHandle::new(config, FixedBackoff::new(self.retry_interval));

        // Puts are never interrupted; the sender is held so the signal stays open.
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let result = retry
            .retry(|| self.client.put_record(&self.stream, &record), &mut shutdown_rx)
            .await;

        match result {
            Ok(output) => {
                debug!(
                    stream = %self.stream,
                    bytes = record.data.len(),
                    sequence = %output.sequence_number,
                    "Put serialized batch"
                );
                Ok(output)
            }
            Err(e) => {
                warn!(
                    stream = %self.stream,
                    attempts = retry.attempts(),
                    error = %e,
                    "Failed to put serialized batch"
                );
                Err(e.into())
            }
        }
    }
}

/// Identical blobs always land on the same shard
pub(super) fn partition_key(blob: &[u8]) -> String {
    format!("{:x}", Sha256::digest(blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_follows_content() {
        let a = partition_key(b"first\nsecond\n");
        assert_eq!(a.len(), 64);
        assert_eq!(a, partition_key(b"first\nsecond\n"));
        assert_ne!(a, partition_key(b"first\n"));
    }
}
