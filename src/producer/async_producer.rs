use super::FailureHandler;
use crate::client::{KinesisClientTrait, ProducerRecord};
use crate::config::AsyncProducerConfig;
use crate::error::ConfigError;
use crate::retry::{Backoff, FixedBackoff};
use crate::stats::StatLogger;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace};

#[derive(Debug)]
enum QueueItem {
    Record(ProducerRecord),
    /// Each worker exits after taking one of these
    Shutdown,
}

/// Queues records for background workers that send them in PutRecords
/// batches, spreading load across the stream's shards.
///
/// Must be created inside a tokio runtime.
pub struct AsyncProducer {
    stream: String,
    tx: mpsc::Sender<QueueItem>,
    // Held for reading while enqueueing so nothing is queued once the flag flips.
    shut_down: RwLock<bool>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncProducer {
    pub fn new<C>(
        stream: impl Into<String>,
        client: C,
        config: AsyncProducerConfig,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Result<Self, ConfigError>
    where
        C: KinesisClientTrait + 'static,
    {
        config.validate()?;

        let stream = stream.into();
        let client = Arc::new(client);
        let (tx, rx) = mpsc::channel(config.queue_size);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = StatLogger::default();

        let workers = (0..config.worker_count)
            .map(|id| {
                let worker = AsyncProducerWorker {
                    id,
                    stream: stream.clone(),
                    client: client.clone(),
                    queue: queue.clone(),
                    failure_handler: failure_handler.clone(),
                    stats: stats.clone(),
                    send_every: config.send_every,
                    send_size: config.effective_send_size(),
                    retries: config.retries,
                    backoff: FixedBackoff::new(config.retry_interval),
                    buffer: Vec::with_capacity(config.effective_send_size()),
                    last_put_at: Instant::now(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(stream = %stream, workers = config.worker_count, "Started async producer");

        Ok(Self {
            stream,
            tx,
            shut_down: RwLock::new(false),
            worker_count: config.worker_count,
            workers: Mutex::new(workers),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Queues one record, waiting for room if the queue is full. Returns
    /// `false` once shutdown has started.
    pub async fn put(&self, partition_key: impl Into<String>, data: impl Into<Bytes>) -> bool {
        let shut_down = self.shut_down.read().await;
        if *shut_down {
            return false;
        }
        self.tx
            .send(QueueItem::Record(ProducerRecord::new(partition_key, data)))
            .await
            .is_ok()
    }

    /// Queues every record. Returns `false`, having queued none of them, once
    /// shutdown has started.
    pub async fn put_all<I>(&self, records: I) -> bool
    where
        I: IntoIterator<Item = ProducerRecord>,
    {
        let shut_down = self.shut_down.read().await;
        if *shut_down {
            return false;
        }
        for record in records {
            if self.tx.send(QueueItem::Record(record)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Stops accepting records and tells every worker to send what it has and
    /// exit. Records already queued are still sent.
    pub async fn shutdown(&self) {
        {
            let mut shut_down = self.shut_down.write().await;
            if *shut_down {
                return;
            }
            *shut_down = true;
        }

        debug!(stream = %self.stream, "Shutting down async producer");
        for _ in 0..self.worker_count {
            if self.tx.send(QueueItem::Shutdown).await.is_err() {
                break;
            }
        }
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
                        error!(error = %e, "Producer worker panicked");
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

/// Drains the shared queue into PutRecords batches
struct AsyncProducerWorker<C> {
    id: usize,
    stream: String,
    client: Arc<C>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<QueueItem>>>,
    failure_handler: Arc<dyn FailureHandler>,
    stats: StatLogger,
    send_every: Duration,
    send_size: usize,
    retries: u32,
    backoff: FixedBackoff,
    buffer: Vec<ProducerRecord>,
    last_put_at: Instant,
}

impl<C: KinesisClientTrait> AsyncProducerWorker<C> {
    async fn run(mut self) {
        trace!(worker = self.id, "Producer worker started");

        loop {
            let next_wait =
                (self.last_put_at + self.send_every).saturating_duration_since(Instant::now());
            let queue = &self.queue;
            let polled = timeout(next_wait, async { queue.lock().await.recv().await }).await;

            let (next_item, shutting_down) = match polled {
                Ok(Some(QueueItem::Record(record))) => (Some(record), false),
                // A closed queue means the producer is gone.
                Ok(Some(QueueItem::Shutdown)) | Ok(None) => (None, true),
                Err(_) => {
                    self.last_put_at = Instant::now();
                    (None, false)
                }
            };

            let received = next_item.is_some();
            if let Some(record) = next_item {
                self.buffer.push(record);
            }

            if self.buffer.len() >= self.send_size || (!received && !self.buffer.is_empty()) {
                let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.send_size));
                self.put_records(batch).await;
                self.last_put_at = Instant::now();
            }

            if shutting_down {
                break;
            }
        }

        trace!(worker = self.id, "Producer worker stopped");
    }

    async fn put_records(&self, records: Vec<ProducerRecord>) {
        let stat = format!("kinesis.put_records.time.{}", self.stream);

        for attempt in 1..=self.retries {
            let result = self
                .stats
                .time(&stat, self.client.put_records(&self.stream, &records))
                .await;

            match result {
                Ok(failures) => {
                    if !failures.is_empty() {
                        error!(
                            stream = %self.stream,
                            failed = failures.len(),
                            "put_records returned failures"
                        );
                        self.failure_handler.on_record_failure(&failures);
                    }
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
                        records = records.len(),
                        "PutRecords request to Kinesis failed"
                    );
                    self.failure_handler.on_kinesis_failure(&e, &records);
                }
            }
        }
    }
}
