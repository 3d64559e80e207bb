//! Consuming a stream: record processor interfaces, checkpointing and the worker

pub mod legacy;
mod processor;
mod types;
mod worker;

pub use processor::{
    BlockProcessor, RecordProcessor, RecordProcessorFactory, RecordProcessorShim,
    ShardRecordProcessor, ShardRecordProcessorFactory, ShimFactory,
};
pub use types::{
    Checkpointer, InitializationInput, ProcessRecordsInput, ShutdownInput, ShutdownReason,
};
#[cfg(feature = "dynamodb-store")]
pub use worker::new_worker;
pub use worker::{Worker, WorkerBuilder};
