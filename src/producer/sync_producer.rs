use super::{FailureHandler, NoopFailureHandler, MAX_PUT_RECORDS_SIZE};
use crate::client::{KinesisClientTrait, ProducerRecord, PutRecordOutput, RecordFailure};
use crate::error::ProducerError;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, trace};

/// Puts records on the caller's task, one request per call or per 500 records
pub struct SyncProducer<C> {
    stream: String,
    client: C,
    failure_handler: Arc<dyn FailureHandler>,
}

impl<C: KinesisClientTrait> SyncProducer<C> {
    pub fn new(stream: impl Into<String>, client: C) -> Self {
        Self {
            stream: stream.into(),
            client,
            failure_handler: Arc::new(NoopFailureHandler),
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn put(
        &self,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<PutRecordOutput, ProducerError> {
        let record = ProducerRecord::new(partition_key, data);
        let output = self.client.put_record(&self.stream, &record).await?;
        trace!(stream = %self.stream, shard_id = %output.shard_id, "Put record");
        Ok(output)
    }

    /// Puts `records` in PutRecords batches of at most 500. Records Kinesis
    /// rejected are passed to the failure handler and returned.
    ///
    /// A request that fails outright stops the call; earlier batches stay put.
    pub async fn put_all<I>(&self, records: I) -> Result<Vec<RecordFailure>, ProducerError>
    where
        I: IntoIterator<Item = ProducerRecord>,
    {
        let records: Vec<ProducerRecord> = records.into_iter().collect();
        let mut all_failures = Vec::new();

        for batch in records.chunks(MAX_PUT_RECORDS_SIZE) {
            let failures = self.client.put_records(&self.stream, batch).await?;
            if !failures.is_empty() {
                error!(
                    stream = %self.stream,
                    failed = failures.len(),
                    "put_records returned failures"
                );
                self.failure_handler.on_record_failure(&failures);
                all_failures.extend(failures);
            }
        }

        Ok(all_failures)
    }
}
