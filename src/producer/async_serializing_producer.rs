use super::serializing_producer::partition_key;
use super::{BatchSerializer, FailureHandler};
use crate::client::{KinesisClientTrait, ProducerRecord};
use crate::config::AsyncSerializingProducerConfig;
use crate::error::ConfigError;
use crate::retry::{Backoff, FixedBackoff};
use crate::stats::StatLogger;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace};

#[derive(Debug)]
enum QueueItem {
    Record(Bytes),
    /// The worker that takes this flushes its serializer and exits
    Shutdown,
}

/// Queues records for background workers that each pack them into blobs with
/// their own [`BatchSerializer`], putting every finished blob as one record.
///
/// Must be created inside a tokio runtime.
pub struct AsyncSerializingProducer {
    stream: String,
    tx: mpsc::Sender<QueueItem>,
    // Held for reading while enqueueing so nothing is queued once the flag flips.
    closed: RwLock<bool>,
    tokens_sent: AtomicBool,
    flush_signals: Vec<Arc<Notify>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncSerializingProducer {
    /// Starts `config.worker_count` workers, each with a serializer from
    /// `make_serializer`.
    pub fn new<C, S, M>(
        stream: impl Into<String>,
        client: C,
        config: AsyncSerializingProducerConfig,
        make_serializer: M,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Result<Self, ConfigError>
    where
        C: KinesisClientTrait + 'static,
        S: BatchSerializer + 'static,
        M: Fn() -> S,
    {
        config.validate()?;

        let stream = stream.into();
        let client = Arc::new(client);
        let (tx, rx) = mpsc::channel(config.queue_size);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = StatLogger::default();

        let mut flush_signals = Vec::with_capacity(config.worker_count);
        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let flush = Arc::new(Notify::new());
            let worker = SerializingWorker {
                queue: queue.clone(),
                serializer: make_serializer(),
                flush: flush.clone(),
                sender: BlobSender {
                    id,
                    stream: stream.clone(),
                    client: client.clone(),
                    failure_handler: failure_handler.clone(),
                    stats: stats.clone(),
                    retries: config.retries,
                    backoff: FixedBackoff::new(config.retry_interval),
                },
            };
            flush_signals.push(flush);
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            stream = %stream,
            workers = config.worker_count,
            "Started async serializing producer"
        );

        Ok(Self {
            stream,
            tx,
            closed: RwLock::new(false),
            tokens_sent: AtomicBool::new(false),
            flush_signals,
            workers: Mutex::new(workers),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Queues one record, waiting for room if the queue is full. Returns
    /// `false` once the producer stopped accepting records.
    pub async fn put(&self, record: impl Into<Bytes>) -> bool {
        let closed = self.closed.read().await;
        if *closed {
            return false;
        }
        self.tx.send(QueueItem::Record(record.into())).await.is_ok()
    }

    /// Asks every worker to put whatever its serializer is holding
    pub fn flush(&self) {
        for signal in &self.flush_signals {
            signal.notify_one();
        }
    }

    /// Stops accepting records and tells every worker to flush and exit.
    /// Records already queued are still sent.
    pub async fn shutdown(&self) {
        *self.closed.write().await = true;
        if self.tokens_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(stream = %self.stream, "Shutting down async serializing producer");
        for _ in 0..self.flush_signals.len() {
            if self.tx.send(QueueItem::Shutdown).await.is_err() {
                break;
            }
        }
    }

    /// Stops accepting records, waits up to `wait` for the queue to empty,
    /// checking every `interval`, then flushes and shuts down. Returns the
    /// number of records still queued when the wait ended.
    pub async fn drain(&self, wait: Duration, interval: Duration) -> usize {
        *self.closed.write().await = true;

        let deadline = Instant::now() + wait;
        while self.queue_size() > 0 && Instant::now() < deadline {
            sleep(interval).await;
        }
        let remaining = self.queue_size();
        if remaining > 0 {
            debug!(stream = %self.stream, remaining, "Queue not empty after drain wait");
        }

        self.flush();
        self.shutdown().await;
        remaining
    }

    /// Waits for every worker to exit. Returns `false` if they are still
    /// running when `wait` elapses.
    pub async fn await_termination(&self, wait: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return true;
        }

        match timeout(wait, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Serializing producer worker panicked");
                    }
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Number of records waiting in the queue
    pub fn queue_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

struct SerializingWorker<C, S> {
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<QueueItem>>>,
    serializer: S,
    flush: Arc<Notify>,
    sender: BlobSender<C>,
}

impl<C: KinesisClientTrait, S: BatchSerializer> SerializingWorker<C, S> {
    async fn run(self) {
        let Self {
            queue,
            mut serializer,
            flush,
            sender,
        } = self;
        trace!(worker = sender.id, "Serializing worker started");

        loop {
            let (record, flush_now, shutting_down) = tokio::select! {
                item = async { queue.lock().await.recv().await } => match item {
                    Some(QueueItem::Record(record)) => (Some(record), false, false),
                    // A closed queue means the producer is gone.
                    Some(QueueItem::Shutdown) | None => (None, true, true),
                },
                _ = flush.notified() => (None, true, false),
            };

            if let Some(record) = record {
                match serializer.write(&record) {
                    Ok(Some(blob)) => sender.put_blob(blob).await,
                    Ok(None) => {}
                    // The record cannot be packed, so it is dropped.
                    Err(e) => {
                        error!(stream = %sender.stream, error = %e, "Error serializing record")
                    }
                }
            }

            if flush_now {
                match serializer.flush() {
                    Ok(Some(blob)) => sender.put_blob(blob).await,
                    Ok(None) => {}
                    Err(e) => {
                        error!(stream = %sender.stream, error = %e, "Error flushing serializer")
                    }
                }
            }

            if shutting_down {
                break;
            }
        }

        trace!(worker = sender.id, "Serializing worker stopped");
    }
}

/// Puts finished blobs for one worker
struct BlobSender<C> {
    id: usize,
    stream: String,
    client: Arc<C>,
    failure_handler: Arc<dyn FailureHandler>,
    stats: StatLogger,
    retries: u32,
    backoff: FixedBackoff,
}

impl<C: KinesisClientTrait> BlobSender<C> {
    async fn put_blob(&self, blob: Bytes) {
        let records = [ProducerRecord::new(partition_key(&blob), blob)];
        let stat = format!("kinesis.put_record.time.{}", self.stream);

        for attempt in 1..=self.retries {
            let result = self
                .stats
                .time(&stat, self.client.put_record(&self.stream, &records[0]))
                .await;

            match result {
                Ok(output) => {
                    trace!(
                        stream = %self.stream,
                        worker = self.id,
                        sequence = %output.sequence_number,
                        "Put serialized batch"
                    );
                    return;
                }
                Err(e) if attempt < self.retries => {
                    debug!(
                        stream = %self.stream,
                        error = %e,
                        retries_remaining = self.retries - attempt,
                        "Error sending data to Kinesis"
                    );
                    self.failure_handler.on_kinesis_retry(&e, &records);
                    sleep(self.backoff.next_delay(attempt)).await;
                }
                Err(e) => {
                    error!(
                        stream = %self.stream,
                        error = %e,
                        attempts = attempt,
                        partition_key = %records[0].partition_key,
                        "PutRecord request to Kinesis failed"
                    );
                    self.failure_handler.on_kinesis_failure(&e, &records);
                }
            }
        }
    }
}
