//! Telekinesis - AWS Kinesis consumers and producers
//!
//! The consumer side runs a [`Worker`](consumer::Worker) that reads every
//! shard of a stream and hands batches to a
//! [`RecordProcessor`](consumer::RecordProcessor), checkpointing progress in a
//! [`CheckpointStore`]. The producer side puts records synchronously, through
//! a pool of batching background workers, or through a batch serializer.

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod producer;
pub mod retry;
pub mod stats;
pub mod store;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

pub use client::{KinesisClientError, KinesisClientTrait, ProducerRecord};
pub use config::{
    AsyncProducerConfig, AsyncSerializingProducerConfig, ConsumerConfig, Credentials,
    InitialPosition,
};
pub use error::{
    CheckpointError, ConfigError, ProcessingError, ProcessorError, ProducerError, Result,
};
pub use retry::{Backoff, ExponentialBackoff, FixedBackoff, RetryConfig};

pub use crate::consumer::{RecordProcessor, Worker, WorkerBuilder};
pub use crate::store::{CheckpointStore, InMemoryCheckpointStore};

#[cfg(feature = "dynamodb-store")]
pub use crate::consumer::new_worker;
#[cfg(feature = "dynamodb-store")]
pub use crate::store::DynamoDbCheckpointStore;
