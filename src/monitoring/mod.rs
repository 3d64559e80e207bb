//! Event stream published by the worker and an aggregator that rolls it into
//! per-shard metrics.

mod metrics;
mod types;

pub use metrics::{MetricsAggregator, ShardMetrics};
#[cfg(feature = "test-utils")]
pub use types::TestMonitoringHarness;
pub use types::{
    IteratorEventType, MonitoringConfig, ProcessingEvent, ProcessingEventType, ShardEventType,
};
