#![allow(dead_code)]

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use telekinesis::consumer::{ShardRecordProcessorFactory, Worker};
use telekinesis::monitoring::MonitoringConfig;
use telekinesis::{
    CheckpointStore, ConsumerConfig, InitialPosition, KinesisClientTrait, RetryConfig,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn create_test_config() -> ConsumerConfig {
    let mut config = ConsumerConfig::new("test-app", "test-stream")
        .with_worker_id("test-worker")
        .with_initial_position(InitialPosition::TrimHorizon)
        .with_max_records(100)
        .with_idle_time_between_reads(Duration::from_millis(10))
        .with_shard_sync_interval(Duration::from_millis(50))
        .with_processing_timeout(Duration::from_secs(1))
        .with_max_retries(Some(3))
        .with_retry(RetryConfig {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            jitter_factor: 0.0,
        });
    config.api_timeout = Duration::from_secs(1);
    config
}

pub fn with_monitoring(config: ConsumerConfig) -> ConsumerConfig {
    config.with_monitoring(MonitoringConfig {
        enabled: true,
        channel_size: 1000,
        metrics_interval: Duration::from_secs(60),
    })
}

/// A worker running on its own task
pub struct RunningWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<telekinesis::Result<()>>,
}

impl RunningWorker {
    pub fn spawn<F, C, S>(worker: Arc<Worker<F, C, S>>) -> Self
    where
        F: ShardRecordProcessorFactory + 'static,
        C: KinesisClientTrait + 'static,
        S: CheckpointStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
        Self { shutdown_tx, handle }
    }

    /// Requests shutdown and waits for the worker to return
    pub async fn stop(self) -> Result<telekinesis::Result<()>> {
        self.shutdown_tx.send(true)?;
        Ok(tokio::time::timeout(Duration::from_secs(5), self.handle).await??)
    }

    /// Waits for the worker to return on its own
    pub async fn join(self) -> Result<telekinesis::Result<()>> {
        Ok(tokio::time::timeout(Duration::from_secs(5), self.handle).await??)
    }
}

/// Polls `check` until it holds or `timeout` passes
pub async fn wait_until<F>(mut check: F, timeout: Duration) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
