//! Processors written against the older callback shape, which receives the
//! shard id, records and checkpointer as separate arguments instead of input
//! objects.

use super::processor::{ShardRecordProcessor, ShardRecordProcessorFactory};
use super::types::{
    Checkpointer, InitializationInput, ProcessRecordsInput, ShutdownInput, ShutdownReason,
};
use crate::error::ProcessingError;
use async_trait::async_trait;
use aws_sdk_kinesis::types::Record;
use std::future::Future;

#[async_trait]
pub trait RecordProcessor: Send {
    async fn init(&mut self, _shard_id: &str) -> Result<(), ProcessingError> {
        Ok(())
    }

    async fn process_records(
        &mut self,
        records: &[Record],
        checkpointer: &Checkpointer,
    ) -> Result<(), ProcessingError>;

    async fn shutdown(
        &mut self,
        _checkpointer: &Checkpointer,
        _reason: ShutdownReason,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Unpacks the worker's input objects and forwards their fields
#[derive(Debug)]
pub struct RecordProcessorShim<P> {
    underlying: P,
}

impl<P> RecordProcessorShim<P> {
    pub fn new(underlying: P) -> Self {
        Self { underlying }
    }

    pub fn into_inner(self) -> P {
        self.underlying
    }
}

#[async_trait]
impl<P: RecordProcessor> ShardRecordProcessor for RecordProcessorShim<P> {
    async fn initialize(&mut self, input: &InitializationInput) -> Result<(), ProcessingError> {
        self.underlying.init(&input.shard_id).await
    }

    async fn process_records(
        &mut self,
        input: &ProcessRecordsInput,
    ) -> Result<(), ProcessingError> {
        self.underlying
            .process_records(&input.records, &input.checkpointer)
            .await
    }

    async fn shutdown(&mut self, input: &ShutdownInput) -> Result<(), ProcessingError> {
        self.underlying
            .shutdown(&input.checkpointer, input.reason)
            .await
    }
}

pub trait RecordProcessorFactory: Send + Sync {
    type Processor: RecordProcessor + 'static;

    fn create_processor(&self) -> Self::Processor;
}

impl<F, P> RecordProcessorFactory for F
where
    F: Fn() -> P + Send + Sync,
    P: RecordProcessor + 'static,
{
    type Processor = P;

    fn create_processor(&self) -> P {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct ShimFactory<F> {
    inner: F,
}

impl<F> ShimFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: RecordProcessorFactory> ShardRecordProcessorFactory for ShimFactory<F> {
    fn create_processor(&self) -> Box<dyn ShardRecordProcessor> {
        Box::new(RecordProcessorShim::new(self.inner.create_processor()))
    }
}

/// Runs a closure with the records and checkpointer of every batch
pub struct BlockRecordProcessor<F> {
    block: F,
}

impl<F, Fut> BlockRecordProcessor<F>
where
    F: FnMut(Vec<Record>, Checkpointer) -> Fut + Send,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    pub fn new(block: F) -> Self {
        Self { block }
    }
}

#[async_trait]
impl<F, Fut> RecordProcessor for BlockRecordProcessor<F>
where
    F: FnMut(Vec<Record>, Checkpointer) -> Fut + Send,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    async fn process_records(
        &mut self,
        records: &[Record],
        checkpointer: &Checkpointer,
    ) -> Result<(), ProcessingError> {
        (self.block)(records.to_vec(), checkpointer.clone()).await
    }
}

/// Builds a worker for a legacy-shaped processor factory, using the default
/// runtime and a DynamoDB checkpoint table named after the application.
#[cfg(feature = "dynamodb-store")]
pub async fn new_worker<F>(
    config: crate::config::ConsumerConfig,
    factory: F,
) -> crate::Result<(
    super::worker::Worker<
        ShimFactory<F>,
        aws_sdk_kinesis::Client,
        crate::store::DynamoDbCheckpointStore,
    >,
    Option<tokio::sync::mpsc::Receiver<crate::monitoring::ProcessingEvent>>,
)>
where
    F: RecordProcessorFactory + 'static,
{
    super::worker::build_aws_worker(config, None, None, ShimFactory::new(factory)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCheckpointStore;
    use crate::test::TestUtils;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        calls: Vec<String>,
    }

    #[async_trait]
    impl RecordProcessor for Recording {
        async fn init(&mut self, shard_id: &str) -> Result<(), ProcessingError> {
            self.calls.push(format!("init:{}", shard_id));
            Ok(())
        }

        async fn process_records(
            &mut self,
            records: &[Record],
            checkpointer: &Checkpointer,
        ) -> Result<(), ProcessingError> {
            self.calls
                .push(format!("records:{}:{}", records.len(), checkpointer.shard_id()));
            Ok(())
        }

        async fn shutdown(
            &mut self,
            _checkpointer: &Checkpointer,
            reason: ShutdownReason,
        ) -> Result<(), ProcessingError> {
            self.calls.push(format!("shutdown:{:?}", reason));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shim_unpacks_inputs() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let checkpointer = Checkpointer::new("shardId-0001", store);
        let mut shim = RecordProcessorShim::new(Recording::default());

        shim.initialize(&InitializationInput {
            shard_id: "shardId-0001".to_string(),
            extended_sequence_number: Some("9".to_string()),
        })
        .await?;
        shim.process_records(&ProcessRecordsInput {
            records: TestUtils::create_test_records(4),
            checkpointer: checkpointer.clone(),
            millis_behind_latest: None,
        })
        .await?;
        shim.shutdown(&ShutdownInput {
            checkpointer,
            reason: ShutdownReason::Requested,
        })
        .await?;

        assert_eq!(
            shim.into_inner().calls,
            vec!["init:shardId-0001", "records:4:shardId-0001", "shutdown:Requested"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_block_record_processor_error_passes_through() {
        let mut shim = RecordProcessorShim::new(BlockRecordProcessor::new(
            |_records: Vec<Record>, _cp: Checkpointer| async {
                Err::<(), _>(ProcessingError::hard(anyhow::anyhow!("bad batch")))
            },
        ));

        let result = shim
            .process_records(&ProcessRecordsInput {
                records: vec![],
                checkpointer: Checkpointer::new("s", Arc::new(InMemoryCheckpointStore::new())),
                millis_behind_latest: None,
            })
            .await;

        let err = result.expect_err("error should pass through");
        assert!(!err.is_soft());
        assert_eq!(err.inner().to_string(), "bad batch");
    }
}
