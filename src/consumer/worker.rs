//! The worker that consumes every shard of a stream
//!
//! [`Worker::run`] refreshes the shard list every `shard_sync_interval` and
//! runs one task per shard. Each task creates a processor from the factory,
//! resumes after the shard's checkpoint and feeds it batches until the shard
//! ends or shutdown is requested.

use super::processor::{ShardRecordProcessor, ShardRecordProcessorFactory};
#[cfg(feature = "dynamodb-store")]
use super::processor::{RecordProcessorFactory, ShimFactory};
use super::types::{
    Checkpointer, InitializationInput, ProcessRecordsInput, ShutdownInput, ShutdownReason,
};
use crate::client::{KinesisClientError, KinesisClientTrait, RecordBatch};
use crate::config::{ConsumerConfig, InitialPosition};
use crate::error::{CheckpointError, ProcessingError, ProcessorError, Result};
use crate::monitoring::{IteratorEventType, ProcessingEvent, ShardEventType};
use crate::retry::{shutdown_signal, Backoff, ExponentialBackoff, RetryHandle};
use crate::store::CheckpointStore;
use aws_sdk_kinesis::types::{Record, Shard, ShardIteratorType};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

/// Shared by the worker and every shard task it spawns
struct WorkerContext<F, C, S> {
    factory: F,
    client: C,
    store: Arc<S>,
    config: ConsumerConfig,
    monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
    semaphore: Option<Arc<Semaphore>>,
    active: Mutex<HashSet<String>>,
    completed: Mutex<HashSet<String>>,
}

impl<F, C, S> WorkerContext<F, C, S> {
    async fn send_event(&self, event: ProcessingEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.send(event).await {
                warn!(error = %e, "Failed to send monitoring event");
            } else {
                trace!("Sent monitoring event");
            }
        }
    }
}

/// Consumes a Kinesis stream, driving one [`ShardRecordProcessor`] per shard
pub struct Worker<F, C, S> {
    context: Arc<WorkerContext<F, C, S>>,
    executor: Option<Handle>,
}

/// Assembles a [`Worker`] from its configuration, processor factory, Kinesis
/// client and checkpoint store
pub struct WorkerBuilder<F, C, S> {
    config: ConsumerConfig,
    factory: F,
    client: C,
    store: S,
    executor: Option<Handle>,
}

impl<F, C, S> WorkerBuilder<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    pub fn new(config: ConsumerConfig, factory: F, client: C, store: S) -> Self {
        Self {
            config,
            factory,
            client,
            store,
            executor: None,
        }
    }

    /// Runtime that shard tasks are spawned on. Defaults to the runtime
    /// `run` is called from.
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Returns the worker and, when monitoring is enabled, the receiving end of
    /// its event channel.
    pub fn build(self) -> Result<(Worker<F, C, S>, Option<mpsc::Receiver<ProcessingEvent>>)> {
        self.config.validate()?;

        let (monitoring_tx, monitoring_rx) = if self.config.monitoring.enabled {
            let (tx, rx) = mpsc::channel(self.config.monitoring.channel_size);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let semaphore = self
            .config
            .max_concurrent_shards
            .map(|max| Arc::new(Semaphore::new(max as usize)));

        let context = WorkerContext {
            factory: self.factory,
            client: self.client,
            store: Arc::new(self.store),
            config: self.config,
            monitoring_tx,
            semaphore,
            active: Mutex::new(HashSet::new()),
            completed: Mutex::new(HashSet::new()),
        };

        Ok((
            Worker {
                context: Arc::new(context),
                executor: self.executor,
            },
            monitoring_rx,
        ))
    }
}

impl<F, C, S> Worker<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    pub fn builder(
        config: ConsumerConfig,
        factory: F,
        client: C,
        store: S,
    ) -> WorkerBuilder<F, C, S> {
        WorkerBuilder::new(config, factory, client, store)
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.context.config
    }

    pub fn executor(&self) -> Option<&Handle> {
        self.executor.as_ref()
    }

    pub fn checkpoint_store(&self) -> &S {
        &self.context.store
    }

    pub fn factory(&self) -> &F {
        &self.context.factory
    }

    /// Shards read to their end since the worker was built
    pub fn completed_shards(&self) -> HashSet<String> {
        self.context.completed.lock().clone()
    }

    /// Runs until `true` is sent on `shutdown` or the shard list cannot be
    /// read. Every running processor is shut down before this returns.
    #[instrument(
        skip_all,
        fields(
            stream = %self.context.config.stream,
            worker_id = %self.context.config.worker_id
        )
    )]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting worker");

        // Shard tasks stop on this, so a fatal error here stops them too.
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let result = loop {
            reap_finished(&mut tasks);

            match self.list_shards(&mut shutdown).await {
                Ok(shards) => self.spawn_eligible(&shards, &stop_rx, &mut tasks),
                Err(ProcessorError::Shutdown) => break Ok(()),
                Err(e) => {
                    error!(error = %e, "Failed to list shards");
                    break Err(ProcessorError::ShardRefreshError(e.to_string()));
                }
            }

            tokio::select! {
                _ = sleep(self.context.config.shard_sync_interval) => {}
                _ = shutdown_signal(&mut shutdown) => break Ok(()),
            }
        };

        info!(running = tasks.len(), "Stopping shard tasks");
        let _ = stop_tx.send(true);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Shard task panicked");
            }
        }

        info!("Worker stopped");
        result
    }

    async fn list_shards(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Vec<Shard>> {
        let config = &self.context.config;
        let backoff = ExponentialBackoff::from_config(&config.retry);
        let mut retry = RetryHandle::new(config.retry.clone(), backoff);

        let shards = retry
            .retry(
                || async {
                    let listed = self.context.client.list_shards(&config.stream);
                    match timeout(config.api_timeout, listed).await {
                        Ok(result) => result,
                        Err(_) => Err(KinesisClientError::Timeout("ListShards".to_string())),
                    }
                },
                shutdown,
            )
            .await?;

        debug!(count = shards.len(), "Listed shards");
        Ok(shards)
    }

    fn spawn_eligible(
        &self,
        shards: &[Shard],
        stop_rx: &watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) {
        let listed: HashSet<&str> = shards.iter().map(|s| s.shard_id()).collect();

        for shard in shards {
            let shard_id = shard.shard_id();
            if !self.is_eligible(shard, &listed) {
                continue;
            }

            self.context.active.lock().insert(shard_id.to_string());
            let task = run_shard(self.context.clone(), shard_id.to_string(), stop_rx.clone());
            match &self.executor {
                Some(handle) => {
                    tasks.spawn_on(task, handle);
                }
                None => {
                    tasks.spawn(task);
                }
            }
        }
    }

    /// A shard is taken on once, and only after any listed parent has ended
    fn is_eligible(&self, shard: &Shard, listed: &HashSet<&str>) -> bool {
        let shard_id = shard.shard_id();
        let completed = self.context.completed.lock();

        if completed.contains(shard_id) || self.context.active.lock().contains(shard_id) {
            return false;
        }

        let waiting_on = [shard.parent_shard_id(), shard.adjacent_parent_shard_id()]
            .into_iter()
            .flatten()
            .find(|parent| listed.contains(parent) && !completed.contains(*parent));

        if let Some(parent) = waiting_on {
            trace!(shard_id = %shard_id, parent = %parent, "Waiting for parent shard to complete");
            return false;
        }
        true
    }
}

/// Collects shard tasks that have already returned
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            error!(error = %e, "Shard task panicked");
        }
    }
}

/// Releases a shard's slot in the active set however its task ends, so a
/// panicking processor leaves the shard eligible for the next sync round
struct ActiveShard<F, C, S> {
    ctx: Arc<WorkerContext<F, C, S>>,
    shard_id: String,
}

impl<F, C, S> Drop for ActiveShard<F, C, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(shard_id = %self.shard_id, "Shard task panicked, retrying on next sync");
            if let Some(tx) = &self.ctx.monitoring_tx {
                // Async sends are unavailable while unwinding.
                drop(tx.try_send(ProcessingEvent::shard_event(
                    self.shard_id.clone(),
                    ShardEventType::Error,
                    Some("record processor panicked".to_string()),
                )));
            }
        }
        self.ctx.active.lock().remove(&self.shard_id);
    }
}

type IteratorStart = (ShardIteratorType, Option<String>, Option<DateTime<Utc>>);

fn retries_exhausted(config: &ConsumerConfig, attempt: u32) -> bool {
    config.retry.max_retries.is_some_and(|max| attempt >= max)
}

/// How a shard task ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardOutcome {
    Completed,
    Interrupted,
}

async fn run_shard<F, C, S>(
    ctx: Arc<WorkerContext<F, C, S>>,
    shard_id: String,
    mut shutdown: watch::Receiver<bool>,
) where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    let _active = ActiveShard {
        ctx: ctx.clone(),
        shard_id: shard_id.clone(),
    };

    let _permit = match &ctx.semaphore {
        Some(semaphore) => {
            let acquired = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = shutdown_signal(&mut shutdown) => None,
            };
            if acquired.is_none() {
                return;
            }
            acquired
        }
        None => None,
    };

    ctx.send_event(ProcessingEvent::shard_event(
        shard_id.clone(),
        ShardEventType::Started,
        None,
    ))
    .await;

    match ShardConsumer::start(ctx.clone(), shard_id.clone(), shutdown).await {
        Ok(ShardOutcome::Completed) => {
            info!(shard_id = %shard_id, "Shard completed");
            ctx.completed.lock().insert(shard_id.clone());
            ctx.send_event(ProcessingEvent::shard_event(
                shard_id.clone(),
                ShardEventType::Completed,
                None,
            ))
            .await;
        }
        Ok(ShardOutcome::Interrupted) => {
            debug!(shard_id = %shard_id, "Shard processing interrupted by shutdown");
            ctx.send_event(ProcessingEvent::shard_event(
                shard_id.clone(),
                ShardEventType::Interrupted,
                Some("shutdown requested".to_string()),
            ))
            .await;
        }
        Err(e) => {
            error!(
                shard_id = %shard_id,
                error = %e,
                "Shard processing failed, retrying on next sync"
            );
            ctx.send_event(ProcessingEvent::shard_event(
                shard_id.clone(),
                ShardEventType::Error,
                Some(e.to_string()),
            ))
            .await;
        }
    }
}

/// Reads one shard into one processor
struct ShardConsumer<F, C, S> {
    ctx: Arc<WorkerContext<F, C, S>>,
    shard_id: String,
    processor: Box<dyn ShardRecordProcessor>,
    checkpointer: Checkpointer,
    shutdown: watch::Receiver<bool>,
}

impl<F, C, S> ShardConsumer<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    async fn start(
        ctx: Arc<WorkerContext<F, C, S>>,
        shard_id: String,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ShardOutcome> {
        let mut processor = ctx.factory.create_processor();

        let checkpoint = ctx
            .store
            .get_checkpoint(&shard_id)
            .await
            .map_err(|e| CheckpointError::RetrieveFailed(e.to_string()))?;

        let store: Arc<dyn CheckpointStore> = ctx.store.clone();
        let checkpointer = Checkpointer::new(shard_id.clone(), store)
            .with_monitoring(ctx.monitoring_tx.clone())
            .with_last_checkpoint(checkpoint.clone());

        let init = InitializationInput {
            shard_id: shard_id.clone(),
            extended_sequence_number: checkpoint.clone(),
        };
        processor
            .initialize(&init)
            .await
            .map_err(|e| ProcessorError::RecordProcessorFailed {
                shard_id: shard_id.clone(),
                message: e.to_string(),
            })?;

        debug!(shard_id = %shard_id, checkpoint = ?checkpoint, "Record processor initialized");
        ctx.send_event(ProcessingEvent::shard_event(
            shard_id.clone(),
            ShardEventType::Initialized,
            None,
        ))
        .await;

        let mut consumer = Self {
            ctx,
            shard_id,
            processor,
            checkpointer,
            shutdown,
        };

        match consumer.consume(checkpoint).await {
            Ok(ShutdownReason::Terminate) => {
                consumer.shutdown_processor(ShutdownReason::Terminate).await?;
                Ok(ShardOutcome::Completed)
            }
            Ok(_) | Err(ProcessorError::Shutdown) => {
                // The shard is not finished, so a failing shutdown only gets logged.
                let _ = consumer.shutdown_processor(ShutdownReason::Requested).await;
                Ok(ShardOutcome::Interrupted)
            }
            Err(e) => {
                let _ = consumer.shutdown_processor(ShutdownReason::Zombie).await;
                Err(e)
            }
        }
    }

    /// Feeds batches to the processor until the shard ends or shutdown
    async fn consume(&mut self, checkpoint: Option<String>) -> Result<ShutdownReason> {
        let mut iterator = self.get_iterator(checkpoint.as_deref()).await?;
        self.ctx
            .send_event(ProcessingEvent::iterator(
                self.shard_id.clone(),
                IteratorEventType::Initial,
                None,
            ))
            .await;

        loop {
            if *self.shutdown.borrow() {
                return Ok(ShutdownReason::Requested);
            }

            let batch = match self.get_records(&iterator).await {
                Ok(batch) => batch,
                Err(ProcessorError::IteratorExpired(_)) => {
                    iterator = self.renew_iterator().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let record_count = batch.records.len();
            trace!(shard_id = %self.shard_id, records = record_count, "Received batch");

            if let Some(last) = batch.records.last() {
                self.checkpointer.set_last_delivered(last.sequence_number());
            }

            if record_count > 0 || self.ctx.config.call_process_records_even_for_empty_record_list {
                self.deliver(batch.records, batch.millis_behind_latest).await?;
            }

            match batch.next_iterator {
                Some(next) => iterator = next,
                None => {
                    info!(shard_id = %self.shard_id, "Reached end of shard");
                    return Ok(ShutdownReason::Terminate);
                }
            }

            if record_count == 0 {
                tokio::select! {
                    _ = sleep(self.ctx.config.idle_time_between_reads) => {}
                    _ = shutdown_signal(&mut self.shutdown) => return Ok(ShutdownReason::Requested),
                }
            }
        }
    }

    /// Hands one batch to the processor, retrying soft failures. A batch that
    /// still fails is skipped.
    async fn deliver(
        &mut self,
        records: Vec<Record>,
        millis_behind_latest: Option<i64>,
    ) -> Result<()> {
        let record_count = records.len();
        let input = ProcessRecordsInput {
            records,
            checkpointer: self.checkpointer.clone(),
            millis_behind_latest,
        };

        let processing_timeout = self.ctx.config.processing_timeout;
        let max_retries = self.ctx.config.max_retries;
        let backoff = ExponentialBackoff::from_config(&self.ctx.config.retry);
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let processed = self.processor.process_records(&input);
            let result = match timeout(processing_timeout, processed).await {
                Ok(result) => result,
                Err(_) => Err(ProcessingError::soft(ProcessorError::ProcessingTimeout(
                    processing_timeout,
                ))),
            };

            let err = match result {
                Ok(()) => {
                    trace!(
                        shard_id = %self.shard_id,
                        records = record_count,
                        attempt,
                        "Batch processed"
                    );
                    self.ctx
                        .send_event(ProcessingEvent::batch_delivered(
                            self.shard_id.clone(),
                            record_count,
                            attempt,
                            start.elapsed(),
                        ))
                        .await;
                    return Ok(());
                }
                Err(e) => e,
            };

            let retriable = err.is_soft();
            let exhausted = max_retries.is_some_and(|max| attempt >= max);
            if retriable && !exhausted {
                let delay = backoff.next_delay(attempt);
                warn!(
                    shard_id = %self.shard_id,
                    attempt,
                    error = %err,
                    delay_ms = ?delay.as_millis(),
                    "Soft failure processing batch, retrying"
                );
                tokio::select! {
                    _ = sleep(delay) => continue,
                    _ = shutdown_signal(&mut self.shutdown) => return Err(ProcessorError::Shutdown),
                }
            }

            error!(
                shard_id = %self.shard_id,
                attempt,
                records = record_count,
                error = %err,
                "Skipping batch after processing failure"
            );
            self.ctx
                .send_event(ProcessingEvent::batch_failure(
                    self.shard_id.clone(),
                    record_count,
                    attempt,
                    retriable,
                    err.to_string(),
                ))
                .await;
            return Ok(());
        }
    }

    async fn get_records(&mut self, iterator: &str) -> Result<RecordBatch> {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let backoff = ExponentialBackoff::from_config(&config.retry);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let read = self.ctx.client.get_records(iterator, config.max_records);
            let result = tokio::select! {
                result = timeout(config.api_timeout, read) => result.unwrap_or_else(|_| {
                    Err(KinesisClientError::Timeout("GetRecords".to_string()))
                }),
                _ = shutdown_signal(&mut self.shutdown) => return Err(ProcessorError::Shutdown),
            };

            match result {
                Ok(batch) => return Ok(batch),
                Err(KinesisClientError::ExpiredIterator) => {
                    return Err(ProcessorError::IteratorExpired(self.shard_id.clone()))
                }
                Err(e) if e.is_retryable() && !retries_exhausted(config, attempt) => {
                    let delay = backoff.next_delay(attempt);
                    debug!(shard_id = %self.shard_id, attempt, error = %e, "Retrying GetRecords");
                    if self.pause(delay).await {
                        return Err(ProcessorError::Shutdown);
                    }
                }
                Err(e) => return Err(ProcessorError::GetRecordsFailed(e.to_string())),
            }
        }
    }

    /// Gets an iterator just after `after`, or at the configured initial
    /// position when there is nothing to resume from
    async fn get_iterator(&mut self, after: Option<&str>) -> Result<String> {
        let (iterator_type, sequence_number, timestamp): IteratorStart =
            match (after, &self.ctx.config.initial_position) {
                (Some(seq), _) => (
                    ShardIteratorType::AfterSequenceNumber,
                    Some(seq.to_string()),
                    None,
                ),
                (None, InitialPosition::TrimHorizon) => {
                    (ShardIteratorType::TrimHorizon, None, None)
                }
                (None, InitialPosition::Latest) => (ShardIteratorType::Latest, None, None),
                (None, InitialPosition::AtSequenceNumber(seq)) => {
                    (ShardIteratorType::AtSequenceNumber, Some(seq.clone()), None)
                }
                (None, InitialPosition::AtTimestamp(ts)) => {
                    (ShardIteratorType::AtTimestamp, None, Some(*ts))
                }
            };

        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let backoff = ExponentialBackoff::from_config(&config.retry);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                result = timeout(
                    config.api_timeout,
                    self.ctx.client.get_shard_iterator(
                        &config.stream,
                        &self.shard_id,
                        iterator_type.clone(),
                        sequence_number.as_deref(),
                        timestamp.as_ref(),
                    ),
                ) => result.unwrap_or_else(|_| {
                    Err(KinesisClientError::Timeout("GetShardIterator".to_string()))
                }),
                _ = shutdown_signal(&mut self.shutdown) => return Err(ProcessorError::Shutdown),
            };

            match result {
                Ok(iterator) => {
                    debug!(
                        shard_id = %self.shard_id,
                        iterator_type = ?iterator_type,
                        sequence = ?sequence_number,
                        "Acquired shard iterator"
                    );
                    return Ok(iterator);
                }
                Err(e) if e.is_retryable() && !retries_exhausted(config, attempt) => {
                    let delay = backoff.next_delay(attempt);
                    debug!(
                        shard_id = %self.shard_id,
                        attempt,
                        error = %e,
                        "Retrying GetShardIterator"
                    );
                    if self.pause(delay).await {
                        return Err(ProcessorError::Shutdown);
                    }
                }
                Err(e) => {
                    self.ctx
                        .send_event(ProcessingEvent::iterator(
                            self.shard_id.clone(),
                            IteratorEventType::Failed,
                            Some(e.to_string()),
                        ))
                        .await;
                    return Err(ProcessorError::GetIteratorFailed(e.to_string()));
                }
            }
        }
    }

    /// Replaces an expired iterator, resuming after the newest record already
    /// delivered
    async fn renew_iterator(&mut self) -> Result<String> {
        warn!(shard_id = %self.shard_id, "Shard iterator expired, renewing");
        self.ctx
            .send_event(ProcessingEvent::iterator(
                self.shard_id.clone(),
                IteratorEventType::Expired,
                None,
            ))
            .await;

        let resume_after = self
            .checkpointer
            .last_delivered()
            .or_else(|| self.checkpointer.last_checkpoint());
        let iterator = self.get_iterator(resume_after.as_deref()).await?;

        self.ctx
            .send_event(ProcessingEvent::iterator(
                self.shard_id.clone(),
                IteratorEventType::Renewed,
                None,
            ))
            .await;
        Ok(iterator)
    }

    /// Sleeps for `delay`, returning `true` if shutdown was requested first
    async fn pause(&mut self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = shutdown_signal(&mut self.shutdown) => true,
        }
    }

    async fn shutdown_processor(&mut self, reason: ShutdownReason) -> Result<()> {
        let checkpointer = match reason {
            ShutdownReason::Zombie => self.checkpointer.disabled(),
            ShutdownReason::Terminate | ShutdownReason::Requested => self.checkpointer.clone(),
        };
        let input = ShutdownInput {
            checkpointer,
            reason,
        };

        let processing_timeout = self.ctx.config.processing_timeout;
        let result = match timeout(processing_timeout, self.processor.shutdown(&input)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("shutdown timed out after {:?}", processing_timeout)),
        };

        match &result {
            Ok(()) => {
                debug!(shard_id = %self.shard_id, reason = ?reason, "Record processor shut down")
            }
            Err(e) => warn!(
                shard_id = %self.shard_id,
                reason = ?reason,
                error = %e,
                "Record processor shutdown failed"
            ),
        }

        self.ctx
            .send_event(ProcessingEvent::processor_shutdown(
                self.shard_id.clone(),
                reason,
                result.as_ref().err().cloned(),
            ))
            .await;

        result.map_err(|message| ProcessorError::RecordProcessorFailed {
            shard_id: self.shard_id.clone(),
            message,
        })
    }
}

/// Builds a worker wired to AWS: a Kinesis client from the config's
/// credentials and region, and a DynamoDB checkpoint table named after the
/// application. `dynamo_client` replaces the DynamoDB client the worker would
/// otherwise build from the same settings.
#[cfg(feature = "dynamodb-store")]
pub async fn new_worker<P>(
    config: ConsumerConfig,
    executor: Option<Handle>,
    dynamo_client: Option<aws_sdk_dynamodb::Client>,
    factory: P,
) -> Result<(
    Worker<ShimFactory<P>, aws_sdk_kinesis::Client, crate::store::DynamoDbCheckpointStore>,
    Option<mpsc::Receiver<ProcessingEvent>>,
)>
where
    P: RecordProcessorFactory + 'static,
{
    build_aws_worker(config, executor, dynamo_client, ShimFactory::new(factory)).await
}

#[cfg(feature = "dynamodb-store")]
pub(crate) async fn build_aws_worker<F>(
    config: ConsumerConfig,
    executor: Option<Handle>,
    dynamo_client: Option<aws_sdk_dynamodb::Client>,
    factory: F,
) -> Result<(
    Worker<F, aws_sdk_kinesis::Client, crate::store::DynamoDbCheckpointStore>,
    Option<mpsc::Receiver<ProcessingEvent>>,
)>
where
    F: ShardRecordProcessorFactory + 'static,
{
    config.validate()?;

    let sdk_config = config.load_sdk_config().await;
    let kinesis = aws_sdk_kinesis::Client::new(&sdk_config);
    let dynamo = dynamo_client.unwrap_or_else(|| aws_sdk_dynamodb::Client::new(&sdk_config));

    let store = crate::store::DynamoDbCheckpointStore::new(
        dynamo,
        config.app.clone(),
        format!("{}:", config.stream),
    );

    let mut builder = WorkerBuilder::new(config, factory, kinesis, store);
    if let Some(executor) = executor {
        builder = builder.executor(executor);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reap_finished_collects_returned_and_panicked_tasks() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {});
        tasks.spawn(async { panic!("shard task failed") });
        tasks.spawn(async { sleep(std::time::Duration::from_secs(60)).await });

        // Let the first two run to completion.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        reap_finished(&mut tasks);
        assert_eq!(tasks.len(), 1);

        tasks.abort_all();
    }
}
