use crate::retry::{ExponentialBackoff, RetryConfig, RetryHandle};
use crate::store::CheckpointStore;
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use std::time::Duration;
use tracing::{debug, instrument, trace};

const KEY_ATTRIBUTE: &str = "shard_id";
const CHECKPOINT_ATTRIBUTE: &str = "checkpoint";

/// Checkpoints stored in a DynamoDB table keyed by `shard_id`.
///
/// Keys are prefixed so that several streams can share a table.
#[derive(Debug, Clone)]
pub struct DynamoDbCheckpointStore {
    client: DynamoClient,
    table_name: String,
    key_prefix: String,
    retry_config: RetryConfig,
    backoff: ExponentialBackoff,
}

impl DynamoDbCheckpointStore {
    pub fn builder() -> DynamoDbCheckpointStoreBuilder {
        DynamoDbCheckpointStoreBuilder::new()
    }

    pub fn new(
        client: DynamoClient,
        table_name: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Self {
        let retry_config = RetryConfig::default();
        Self {
            client,
            table_name: table_name.into(),
            key_prefix: key_prefix.into(),
            backoff: ExponentialBackoff::from_config(&retry_config),
            retry_config,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn client(&self) -> &DynamoClient {
        &self.client
    }

    fn prefixed_key(&self, shard_id: &str) -> String {
        format!("{}{}", self.key_prefix, shard_id)
    }

    fn retry_handle(&self) -> RetryHandle<ExponentialBackoff> {
        RetryHandle::new(self.retry_config.clone(), self.backoff.clone())
    }
}

#[async_trait]
impl CheckpointStore for DynamoDbCheckpointStore {
    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn get_checkpoint(&self, shard_id: &str) -> anyhow::Result<Option<String>> {
        let key = self.prefixed_key(shard_id);
        let (_shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let checkpoint = self
            .retry_handle()
            .retry(
                || async {
                    let response = self
                        .client
                        .get_item()
                        .table_name(&self.table_name)
                        .key(KEY_ATTRIBUTE, AttributeValue::S(key.clone()))
                        .consistent_read(true)
                        .send()
                        .await
                        .context("Failed to get checkpoint from DynamoDB")?;

                    let checkpoint = response
                        .item
                        .and_then(|mut item| item.remove(CHECKPOINT_ATTRIBUTE))
                        .and_then(|attr| attr.as_s().ok().cloned());

                    Ok::<Option<String>, anyhow::Error>(checkpoint)
                },
                &mut shutdown_rx,
            )
            .await?;

        debug!(key = %key, checkpoint = ?checkpoint, "Retrieved checkpoint from DynamoDB");
        Ok(checkpoint)
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn save_checkpoint(&self, shard_id: &str, sequence_number: &str) -> anyhow::Result<()> {
        let key = self.prefixed_key(shard_id);
        let (_shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        self.retry_handle()
            .retry(
                || async {
                    self.client
                        .put_item()
                        .table_name(&self.table_name)
                        .item(KEY_ATTRIBUTE, AttributeValue::S(key.clone()))
                        .item(CHECKPOINT_ATTRIBUTE, AttributeValue::S(sequence_number.to_string()))
                        .send()
                        .await
                        .context("Failed to save checkpoint to DynamoDB")?;
                    Ok::<(), anyhow::Error>(())
                },
                &mut shutdown_rx,
            )
            .await?;

        trace!(key = %key, "Checkpoint saved to DynamoDB");
        Ok(())
    }
}

#[derive(Debug)]
pub struct DynamoDbCheckpointStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
    key_prefix: String,
    retry_config: RetryConfig,
}

impl DynamoDbCheckpointStoreBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            table_name: None,
            key_prefix: String::new(),
            retry_config: RetryConfig {
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(30),
                ..Default::default()
            },
        }
    }

    pub fn with_client(mut self, client: DynamoClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbCheckpointStore> {
        Ok(DynamoDbCheckpointStore {
            client: self.client.ok_or_else(|| anyhow::anyhow!("DynamoDB client is required"))?,
            table_name: self.table_name.ok_or_else(|| anyhow::anyhow!("Table name is required"))?,
            key_prefix: self.key_prefix,
            backoff: ExponentialBackoff::from_config(&self.retry_config),
            retry_config: self.retry_config,
        })
    }
}

impl Default for DynamoDbCheckpointStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
