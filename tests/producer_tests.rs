use anyhow::Result;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telekinesis::client::{KinesisClientError, RecordFailure};
use telekinesis::producer::{
    AsyncProducer, AsyncSerializingProducer, BatchSerializer, DelimitedSerializer,
    FailureHandler, GzipDelimitedSerializer, NoopFailureHandler, SerializingProducer,
    SyncProducer,
};
use telekinesis::test::mocks::MockKinesisClient;
use telekinesis::{
    AsyncProducerConfig, AsyncSerializingProducerConfig, ProducerError, ProducerRecord,
};

fn records(count: usize) -> Vec<ProducerRecord> {
    (0..count)
        .map(|i| ProducerRecord::new(format!("key-{}", i), format!("value-{}", i)))
        .collect()
}

#[derive(Default)]
struct CountingHandler {
    record_failures: AtomicUsize,
    retries: AtomicUsize,
    failures: AtomicUsize,
}

impl FailureHandler for CountingHandler {
    fn on_record_failure(&self, failures: &[RecordFailure]) {
        self.record_failures.fetch_add(failures.len(), Ordering::SeqCst);
    }

    fn on_kinesis_retry(&self, _error: &KinesisClientError, _records: &[ProducerRecord]) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_kinesis_failure(&self, _error: &KinesisClientError, _records: &[ProducerRecord]) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_sync_put_all_batches_by_500() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = SyncProducer::new("test-stream", client.clone());

    let failures = producer.put_all(records(1201)).await?;
    assert!(failures.is_empty());

    let sizes: Vec<usize> = client
        .put_records_requests()
        .await
        .iter()
        .map(Vec::len)
        .collect();
    assert_eq!(sizes, vec![500, 500, 201]);
    Ok(())
}

#[tokio::test]
async fn test_sync_put_all_reports_rejected_records() -> Result<()> {
    let client = MockKinesisClient::new();
    let rejected = RecordFailure {
        record: ProducerRecord::new("key-1", "value-1"),
        error_code: "ProvisionedThroughputExceededException".to_string(),
        error_message: "slow down".to_string(),
    };
    client.mock_put_records(Ok(vec![rejected.clone()])).await;

    let handler = Arc::new(CountingHandler::default());
    let producer =
        SyncProducer::new("test-stream", client).with_failure_handler(handler.clone());

    let failures = producer.put_all(records(3)).await?;
    assert_eq!(failures, vec![rejected]);
    assert_eq!(handler.record_failures.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_sync_put_surfaces_client_errors() {
    let client = MockKinesisClient::new();
    client
        .mock_put_record(Err(KinesisClientError::ResourceNotFound("test-stream".to_string())))
        .await;
    let producer = SyncProducer::new("test-stream", client);

    let result = producer.put("key", Bytes::from_static(b"value")).await;
    assert!(matches!(
        result,
        Err(ProducerError::Kinesis(KinesisClientError::ResourceNotFound(_)))
    ));
}

fn fast_config() -> AsyncProducerConfig {
    AsyncProducerConfig {
        queue_size: 100,
        send_every: Duration::from_millis(50),
        send_size: 10,
        worker_count: 1,
        retries: 3,
        retry_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_async_producer_sends_full_and_idle_batches() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncProducer::new(
        "test-stream",
        client.clone(),
        fast_config(),
        Arc::new(NoopFailureHandler),
    )?;

    assert!(producer.put_all(records(25)).await);
    producer.shutdown().await;
    assert!(producer.await_termination(Duration::from_secs(5)).await);

    let sent: Vec<ProducerRecord> = client.put_records_requests().await.concat();
    assert_eq!(sent, records(25));
    assert!(client
        .put_records_requests()
        .await
        .iter()
        .all(|batch| batch.len() <= 10));
    Ok(())
}

#[tokio::test]
async fn test_async_producer_flushes_partial_batch_when_idle() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncProducer::new(
        "test-stream",
        client.clone(),
        fast_config(),
        Arc::new(NoopFailureHandler),
    )?;

    assert!(producer.put("key", "value").await);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.put_records_requests().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "idle batch never sent");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.put_records_requests().await, vec![records_with("key", "value")]);

    producer.shutdown().await;
    assert!(producer.await_termination(Duration::from_secs(5)).await);
    Ok(())
}

fn records_with(key: &str, value: &str) -> Vec<ProducerRecord> {
    vec![ProducerRecord::new(key.to_string(), value.to_string())]
}

#[tokio::test]
async fn test_async_producer_refuses_records_after_shutdown() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncProducer::new(
        "test-stream",
        client,
        fast_config(),
        Arc::new(NoopFailureHandler),
    )?;

    producer.shutdown().await;
    producer.shutdown().await;
    assert!(!producer.put("key", "value").await);
    assert!(!producer.put_all(records(2)).await);
    assert!(producer.await_termination(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn test_async_producer_retries_then_gives_up() -> Result<()> {
    let client = MockKinesisClient::new();
    for _ in 0..3 {
        client
            .mock_put_records(Err(KinesisClientError::ThroughputExceeded))
            .await;
    }
    let handler = Arc::new(CountingHandler::default());
    let producer =
        AsyncProducer::new("test-stream", client.clone(), fast_config(), handler.clone())?;

    assert!(producer.put("key", "value").await);
    producer.shutdown().await;
    assert!(producer.await_termination(Duration::from_secs(5)).await);

    assert_eq!(client.put_records_requests().await.len(), 3);
    assert_eq!(handler.retries.load(Ordering::SeqCst), 2);
    assert_eq!(handler.failures.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_async_producer_rejects_invalid_config() {
    let config = AsyncProducerConfig {
        worker_count: 0,
        ..AsyncProducerConfig::default()
    };
    let result = AsyncProducer::new(
        "test-stream",
        MockKinesisClient::new(),
        config,
        Arc::new(NoopFailureHandler),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_serializing_producer_puts_blobs() -> Result<()> {
    let client = MockKinesisClient::new();
    let mut producer =
        SerializingProducer::new("test-stream", client.clone(), DelimitedSerializer::new(16, "\n"));

    assert!(producer.put(b"aaaaaaa").await?.is_none());
    assert!(producer.put(b"bbbbbbb").await?.is_none());
    assert!(producer.put(b"ccccccc").await?.is_some());
    assert!(producer.shutdown().await?.is_some());
    assert!(matches!(producer.put(b"late").await, Err(ProducerError::ShutDown)));

    let puts = client.put_record_requests().await;
    assert_eq!(puts.len(), 2);
    assert_eq!(&puts[0].data[..], b"aaaaaaa\nbbbbbbb\n");
    assert_eq!(&puts[1].data[..], b"ccccccc\n");
    assert_ne!(puts[0].partition_key, puts[1].partition_key);
    Ok(())
}

#[tokio::test]
async fn test_serializing_producer_round_trips_gzip() -> Result<()> {
    let client = MockKinesisClient::new();
    let mut producer = SerializingProducer::new(
        "test-stream",
        client.clone(),
        GzipDelimitedSerializer::new(1024, "\n"),
    );

    let lines: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
    for line in &lines {
        producer.put(line.as_bytes()).await?;
    }
    producer.flush().await?;

    let mut read_back = Vec::new();
    for put in client.put_record_requests().await {
        read_back.extend(producer.serializer().read(&put.data)?);
    }
    let read_back: Vec<String> = read_back
        .into_iter()
        .map(String::from_utf8)
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(read_back, lines);
    Ok(())
}

#[tokio::test]
async fn test_serializing_producer_gives_up_after_retries() {
    let client = MockKinesisClient::new();
    for _ in 0..2 {
        client
            .mock_put_record(Err(KinesisClientError::ThroughputExceeded))
            .await;
    }
    let mut producer = SerializingProducer::new(
        "test-stream",
        client.clone(),
        DelimitedSerializer::new(1024, "\n"),
    )
    .with_retries(2, Duration::from_millis(5));

    producer.put(b"record").await.expect("buffered without a put");
    let result = producer.flush().await;

    assert!(matches!(
        result,
        Err(ProducerError::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(client.put_record_requests().await.len(), 2);
}

fn serializing_config(worker_count: usize) -> AsyncSerializingProducerConfig {
    AsyncSerializingProducerConfig {
        queue_size: 100,
        worker_count,
        retries: 3,
        retry_interval: Duration::from_millis(10),
    }
}

fn newline_serializer() -> DelimitedSerializer {
    DelimitedSerializer::new(64, "\n")
}

/// Every record packed into the blobs put so far, sorted
async fn unpacked_records(client: &MockKinesisClient) -> Result<Vec<String>> {
    let mut unpacked = Vec::new();
    for put in client.put_record_requests().await {
        for record in newline_serializer().read(&put.data)? {
            unpacked.push(String::from_utf8(record)?);
        }
    }
    unpacked.sort();
    Ok(unpacked)
}

#[tokio::test]
async fn test_async_serializing_producer_flushes_every_worker_on_shutdown() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncSerializingProducer::new(
        "test-stream",
        client.clone(),
        serializing_config(3),
        newline_serializer,
        Arc::new(NoopFailureHandler),
    )?;

    let mut expected: Vec<String> = (0..40).map(|i| format!("record-{:02}", i)).collect();
    for record in &expected {
        assert!(producer.put(record.clone()).await);
    }
    producer.shutdown().await;
    producer.shutdown().await;
    assert!(!producer.put("late").await);
    assert!(producer.await_termination(Duration::from_secs(5)).await);

    expected.sort();
    assert_eq!(unpacked_records(&client).await?, expected);

    for put in client.put_record_requests().await {
        assert!(put.data.len() <= 64);
        assert_eq!(put.partition_key.len(), 64);
    }
    Ok(())
}

#[tokio::test]
async fn test_async_serializing_producer_flush_puts_partial_blob() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncSerializingProducer::new(
        "test-stream",
        client.clone(),
        serializing_config(1),
        newline_serializer,
        Arc::new(NoopFailureHandler),
    )?;

    for record in ["a", "b", "c"] {
        assert!(producer.put(record).await);
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while producer.queue_size() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.put_record_requests().await.is_empty());

    producer.flush();
    while client.put_record_requests().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "flush never put a blob");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let puts = client.put_record_requests().await;
    assert_eq!(puts.len(), 1);
    assert_eq!(&puts[0].data[..], b"a\nb\nc\n");

    producer.shutdown().await;
    assert!(producer.await_termination(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn test_async_serializing_producer_drain() -> Result<()> {
    let client = MockKinesisClient::new();
    let producer = AsyncSerializingProducer::new(
        "test-stream",
        client.clone(),
        serializing_config(2),
        newline_serializer,
        Arc::new(NoopFailureHandler),
    )?;

    for i in 0..10 {
        assert!(producer.put(format!("record-{}", i)).await);
    }
    let remaining = producer
        .drain(Duration::from_secs(2), Duration::from_millis(10))
        .await;
    assert_eq!(remaining, 0);
    assert!(!producer.put("late").await);
    assert!(producer.await_termination(Duration::from_secs(5)).await);

    assert_eq!(unpacked_records(&client).await?.len(), 10);
    Ok(())
}

#[tokio::test]
async fn test_async_serializing_producer_reports_failed_blobs() -> Result<()> {
    let client = MockKinesisClient::new();
    for _ in 0..3 {
        client
            .mock_put_record(Err(KinesisClientError::ThroughputExceeded))
            .await;
    }
    let handler = Arc::new(CountingHandler::default());
    let producer = AsyncSerializingProducer::new(
        "test-stream",
        client.clone(),
        serializing_config(1),
        newline_serializer,
        handler.clone(),
    )?;

    assert!(producer.put("only").await);
    producer.shutdown().await;
    assert!(producer.await_termination(Duration::from_secs(5)).await);

    assert_eq!(client.put_record_requests().await.len(), 3);
    assert_eq!(handler.retries.load(Ordering::SeqCst), 2);
    assert_eq!(handler.failures.load(Ordering::SeqCst), 1);
    Ok(())
}
