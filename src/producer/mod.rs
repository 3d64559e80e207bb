//! Putting records into a stream
//!
//! - [`SyncProducer`] makes one request per call.
//! - [`AsyncProducer`] queues records for a pool of background workers that
//!   batch them into PutRecords requests.
//! - [`SerializingProducer`] packs records into blobs with a
//!   [`BatchSerializer`] and puts each blob as one record.
//! - [`AsyncSerializingProducer`] does the same from a pool of background
//!   workers, each owning its own serializer.

mod async_producer;
mod async_serializing_producer;
mod serializer;
mod serializing_producer;
mod sync_producer;

pub use crate::config::MAX_PUT_RECORDS_SIZE;
pub use async_producer::AsyncProducer;
pub use async_serializing_producer::AsyncSerializingProducer;
pub use serializer::{BatchSerializer, DelimitedSerializer, GzipDelimitedSerializer};
pub use serializing_producer::SerializingProducer;
pub use sync_producer::SyncProducer;

use crate::client::{KinesisClientError, ProducerRecord, RecordFailure};
use tracing::warn;

/// Callbacks for puts that did not go through.
///
/// Every method defaults to doing nothing.
pub trait FailureHandler: Send + Sync {
    /// Records rejected inside an otherwise successful PutRecords call
    fn on_record_failure(&self, _failures: &[RecordFailure]) {}

    /// A put request failed and will be attempted again
    fn on_kinesis_retry(&self, _error: &KinesisClientError, _records: &[ProducerRecord]) {}

    /// A put request failed for the last time; its records are dropped
    fn on_kinesis_failure(&self, _error: &KinesisClientError, _records: &[ProducerRecord]) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFailureHandler;

impl FailureHandler for NoopFailureHandler {}

/// Logs failures at warn level
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnFailureHandler;

impl FailureHandler for WarnFailureHandler {
    fn on_record_failure(&self, failures: &[RecordFailure]) {
        warn!(count = failures.len(), "Puts for records failed");
    }

    fn on_kinesis_failure(&self, error: &KinesisClientError, records: &[ProducerRecord]) {
        warn!(count = records.len(), error = %error, "Put request failed");
    }
}
