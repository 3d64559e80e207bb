#![cfg(feature = "dynamodb-store")]

use anyhow::Result;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use telekinesis::consumer::{
    legacy, InitializationInput, ProcessRecordsInput, RecordProcessor, ShimFactory, Worker,
};
use telekinesis::test::mocks::{MockKinesisClient, MockRecordProcessor};
use telekinesis::test::TestUtils;
use telekinesis::{
    new_worker, ConsumerConfig, Credentials, InMemoryCheckpointStore, ProcessingError,
};

mod common;
use common::{create_test_config, wait_until, RunningWorker};

fn aws_config() -> ConsumerConfig {
    create_test_config()
        .with_region("us-east-1")
        .with_credentials(Credentials::Static {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
        })
}

#[tokio::test]
async fn test_new_worker_keeps_config_and_defaults() -> Result<()> {
    let config = aws_config();
    let (worker, monitoring_rx) =
        new_worker(config.clone(), None, None, MockRecordProcessor::new).await?;

    assert_eq!(worker.config(), &config);
    assert!(worker.executor().is_none());
    assert!(monitoring_rx.is_none());
    assert_eq!(worker.checkpoint_store().table_name(), "test-app");
    assert_eq!(
        worker.checkpoint_store().client().config().region(),
        Some(&Region::new("us-east-1"))
    );
    Ok(())
}

#[tokio::test]
async fn test_new_worker_uses_supplied_dynamo_client_and_executor() -> Result<()> {
    let dynamo_config = aws_sdk_dynamodb::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("eu-west-3"))
        .build();
    let dynamo = aws_sdk_dynamodb::Client::from_conf(dynamo_config);

    let (worker, _) = new_worker(
        aws_config(),
        Some(tokio::runtime::Handle::current()),
        Some(dynamo),
        MockRecordProcessor::new,
    )
    .await?;

    assert!(worker.executor().is_some());
    assert_eq!(
        worker.checkpoint_store().client().config().region(),
        Some(&Region::new("eu-west-3"))
    );
    Ok(())
}

#[tokio::test]
async fn test_legacy_new_worker() -> Result<()> {
    let config = aws_config();
    let factory = || {
        legacy::BlockRecordProcessor::new(|_records, _checkpointer| async {
            Ok::<(), ProcessingError>(())
        })
    };
    let (worker, _) = legacy::new_worker(config.clone(), factory).await?;

    assert_eq!(worker.config(), &config);
    assert!(worker.executor().is_none());
    Ok(())
}

#[tokio::test]
async fn test_builder_keeps_the_supplied_store() -> Result<()> {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (worker, _) = Worker::builder(
        create_test_config(),
        ShimFactory::new(MockRecordProcessor::new),
        MockKinesisClient::new(),
        store.clone(),
    )
    .build()?;

    assert!(Arc::ptr_eq(worker.checkpoint_store(), &store));
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = create_test_config().with_max_records(0);
    let result = Worker::builder(
        config,
        ShimFactory::new(MockRecordProcessor::new),
        MockKinesisClient::new(),
        InMemoryCheckpointStore::new(),
    )
    .build();
    assert!(result.is_err());
}

/// Notes the thread each shard's processor was initialized on
#[derive(Clone, Default)]
struct ThreadRecorder {
    threads: Arc<parking_lot::Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl RecordProcessor for ThreadRecorder {
    async fn init(&mut self, _input: &InitializationInput) -> Result<(), ProcessingError> {
        self.threads
            .lock()
            .push(std::thread::current().name().map(str::to_string));
        Ok(())
    }

    async fn process_records(
        &mut self,
        _input: &ProcessRecordsInput,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }
}

#[test]
fn test_shard_tasks_run_on_the_supplied_executor() -> Result<()> {
    let executor = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("shard-executor")
        .enable_all()
        .build()?;
    let caller = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let recorder = ThreadRecorder::default();
    let template = recorder.clone();

    caller.block_on(async {
        let client = MockKinesisClient::new();
        client.set_shards(vec![TestUtils::create_test_shard("shard-1")]).await;

        let (worker, _) = Worker::builder(
            create_test_config(),
            ShimFactory::new(move || template.clone()),
            client,
            InMemoryCheckpointStore::new(),
        )
        .executor(executor.handle().clone())
        .build()?;
        let running = RunningWorker::spawn(Arc::new(worker));

        wait_until(|| !recorder.threads.lock().is_empty(), Duration::from_secs(5)).await?;
        running.stop().await??;
        anyhow::Ok(())
    })?;

    assert_eq!(
        recorder.threads.lock().first().cloned().flatten().as_deref(),
        Some("shard-executor")
    );
    executor.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
