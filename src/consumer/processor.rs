//! Record processor interfaces and the shim between them
//!
//! The worker drives [`ShardRecordProcessor`], whose lifecycle starts with
//! `initialize`. Applications implement [`RecordProcessor`], where the same
//! call is named `init`. [`RecordProcessorShim`] forwards each call to the
//! application's processor with the same arguments and hands back its result
//! untouched.

use super::types::{Checkpointer, InitializationInput, ProcessRecordsInput, ShutdownInput};
use crate::error::ProcessingError;
use async_trait::async_trait;
use aws_sdk_kinesis::types::Record;
use std::future::Future;

/// The lifecycle the worker drives for every shard it consumes
#[async_trait]
pub trait ShardRecordProcessor: Send {
    async fn initialize(&mut self, input: &InitializationInput) -> Result<(), ProcessingError>;

    async fn process_records(&mut self, input: &ProcessRecordsInput)
        -> Result<(), ProcessingError>;

    async fn shutdown(&mut self, input: &ShutdownInput) -> Result<(), ProcessingError>;
}

/// Application record processing logic.
///
/// `init` and `shutdown` do nothing unless overridden.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use telekinesis::consumer::{ProcessRecordsInput, RecordProcessor};
/// use telekinesis::ProcessingError;
///
/// struct Tail;
///
/// #[async_trait]
/// impl RecordProcessor for Tail {
///     async fn process_records(
///         &mut self,
///         input: &ProcessRecordsInput,
///     ) -> Result<(), ProcessingError> {
///         for record in &input.records {
///             println!("{}", record.sequence_number());
///         }
///         input.checkpointer.checkpoint().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RecordProcessor: Send {
    async fn init(&mut self, _input: &InitializationInput) -> Result<(), ProcessingError> {
        Ok(())
    }

    async fn process_records(&mut self, input: &ProcessRecordsInput)
        -> Result<(), ProcessingError>;

    async fn shutdown(&mut self, _input: &ShutdownInput) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Presents a [`RecordProcessor`] to the worker as a [`ShardRecordProcessor`]
#[derive(Debug)]
pub struct RecordProcessorShim<P> {
    underlying: P,
}

impl<P> RecordProcessorShim<P> {
    pub fn new(underlying: P) -> Self {
        Self { underlying }
    }

    pub fn underlying(&self) -> &P {
        &self.underlying
    }

    pub fn into_inner(self) -> P {
        self.underlying
    }
}

#[async_trait]
impl<P: RecordProcessor> ShardRecordProcessor for RecordProcessorShim<P> {
    async fn initialize(&mut self, input: &InitializationInput) -> Result<(), ProcessingError> {
        self.underlying.init(input).await
    }

    async fn process_records(
        &mut self,
        input: &ProcessRecordsInput,
    ) -> Result<(), ProcessingError> {
        self.underlying.process_records(input).await
    }

    async fn shutdown(&mut self, input: &ShutdownInput) -> Result<(), ProcessingError> {
        self.underlying.shutdown(input).await
    }
}

/// Creates one application processor per shard. Implemented for closures
/// returning a [`RecordProcessor`].
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

/// What the worker asks for a processor each time it takes on a shard
pub trait ShardRecordProcessorFactory: Send + Sync {
    fn create_processor(&self) -> Box<dyn ShardRecordProcessor>;
}

/// Wraps every processor an application factory creates in a
/// [`RecordProcessorShim`]
#[derive(Debug, Clone)]
pub struct ShimFactory<F> {
    inner: F,
}

impl<F> ShimFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: RecordProcessorFactory> ShardRecordProcessorFactory for ShimFactory<F> {
    fn create_processor(&self) -> Box<dyn ShardRecordProcessor> {
        Box::new(RecordProcessorShim::new(self.inner.create_processor()))
    }
}

/// A processor that runs a closure for every batch, called with the records,
/// a checkpointer and how far behind the tip the batch was.
///
/// ```rust
/// use telekinesis::consumer::BlockProcessor;
/// use telekinesis::ProcessingError;
///
/// let processor = BlockProcessor::new(|records, checkpointer, _millis_behind| async move {
///     println!("{} records", records.len());
///     checkpointer.checkpoint().await?;
///     Ok::<(), ProcessingError>(())
/// });
/// # let _ = processor;
/// ```
pub struct BlockProcessor<F> {
    block: F,
}

impl<F, Fut> BlockProcessor<F>
where
    F: FnMut(Vec<Record>, Checkpointer, Option<i64>) -> Fut + Send,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    pub fn new(block: F) -> Self {
        Self { block }
    }
}

#[async_trait]
impl<F, Fut> RecordProcessor for BlockProcessor<F>
where
    F: FnMut(Vec<Record>, Checkpointer, Option<i64>) -> Fut + Send,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    async fn process_records(
        &mut self,
        input: &ProcessRecordsInput,
    ) -> Result<(), ProcessingError> {
        (self.block)(
            input.records.clone(),
            input.checkpointer.clone(),
            input.millis_behind_latest,
        )
        .await
    }
}
