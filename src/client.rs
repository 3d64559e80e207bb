//! The seam between the worker/producers and AWS Kinesis

use async_trait::async_trait;
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::{
    primitives::Blob,
    types::{PutRecordsRequestEntry, Record, Shard, ShardIteratorType},
    Client,
};
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

/// Errors surfaced by Kinesis API calls, classified by how callers react to them
#[derive(Debug, Clone, Error)]
pub enum KinesisClientError {
    #[error("Shard iterator expired")]
    ExpiredIterator,

    #[error("Provisioned throughput exceeded")]
    ThroughputExceeded,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("KMS error: {0}")]
    KmsError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    Other(String),
}

impl KinesisClientError {
    /// Whether backing off and trying the same request again can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KinesisClientError::ThroughputExceeded
                | KinesisClientError::Timeout(_)
                | KinesisClientError::ConnectionError(_)
        )
    }

    fn from_sdk<E, R>(err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let message = err.message().unwrap_or_default().to_string();
        match err.code() {
            Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
            Some("ProvisionedThroughputExceededException") | Some("LimitExceededException") => {
                KinesisClientError::ThroughputExceeded
            }
            Some("AccessDeniedException") => KinesisClientError::AccessDenied,
            Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
            Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
            Some(code) if code.starts_with("KMS") => {
                KinesisClientError::KmsError(format!("{}: {}", code, message))
            }
            _ => match &err {
                SdkError::TimeoutError(_) => {
                    KinesisClientError::Timeout(DisplayErrorContext(&err).to_string())
                }
                SdkError::DispatchFailure(_) => {
                    KinesisClientError::ConnectionError(DisplayErrorContext(&err).to_string())
                }
                _ => KinesisClientError::Other(DisplayErrorContext(&err).to_string()),
            },
        }
    }
}

/// One GetRecords response
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    /// `None` once the shard has been closed and fully read
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

/// A record to be put into a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub partition_key: String,
    pub data: Bytes,
}

impl ProducerRecord {
    pub fn new(partition_key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            partition_key: partition_key.into(),
            data: data.into(),
        }
    }
}

/// Where a single PutRecord call landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordOutput {
    pub shard_id: String,
    pub sequence_number: String,
}

/// A record rejected inside an otherwise successful PutRecords call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub record: ProducerRecord,
    pub error_code: String,
    pub error_message: String,
}

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<Shard>, KinesisClientError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> Result<String, KinesisClientError>;

    async fn get_records(&self, iterator: &str, limit: i32)
        -> Result<RecordBatch, KinesisClientError>;

    async fn put_record(
        &self,
        stream_name: &str,
        record: &ProducerRecord,
    ) -> Result<PutRecordOutput, KinesisClientError>;

    /// Puts every record in one request. Records the service rejected come
    /// back paired with their error code; an empty vector means all succeeded.
    async fn put_records(
        &self,
        stream_name: &str,
        records: &[ProducerRecord],
    ) -> Result<Vec<RecordFailure>, KinesisClientError>;
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<Shard>, KinesisClientError> {
        let mut shards = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // The API rejects a stream name alongside a pagination token.
            let request = match &next_token {
                Some(token) => self.list_shards().next_token(token),
                None => self.list_shards().stream_name(stream_name),
            };
            let response = request.send().await.map_err(KinesisClientError::from_sdk)?;

            shards.extend(response.shards.unwrap_or_default());
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }

        trace!(stream = %stream_name, count = shards.len(), "Listed shards");
        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> Result<String, KinesisClientError> {
        let mut req = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type);

        if let Some(seq) = sequence_number {
            req = req.starting_sequence_number(seq);
        }

        if let Some(ts) = timestamp {
            req = req.timestamp(aws_smithy_types::DateTime::from_chrono_utc(*ts));
        }

        let response = req.send().await.map_err(KinesisClientError::from_sdk)?;
        response
            .shard_iterator
            .ok_or_else(|| {
                KinesisClientError::Other(format!("No iterator returned for shard {}", shard_id))
            })
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordBatch, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(KinesisClientError::from_sdk)?;

        Ok(RecordBatch {
            records: response.records().to_vec(),
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }

    async fn put_record(
        &self,
        stream_name: &str,
        record: &ProducerRecord,
    ) -> Result<PutRecordOutput, KinesisClientError> {
        let response = self
            .put_record()
            .stream_name(stream_name)
            .partition_key(&record.partition_key)
            .data(Blob::new(record.data.to_vec()))
            .send()
            .await
            .map_err(KinesisClientError::from_sdk)?;

        Ok(PutRecordOutput {
            shard_id: response.shard_id().to_string(),
            sequence_number: response.sequence_number().to_string(),
        })
    }

    async fn put_records(
        &self,
        stream_name: &str,
        records: &[ProducerRecord],
    ) -> Result<Vec<RecordFailure>, KinesisClientError> {
        let entries = records
            .iter()
            .map(|r| {
                PutRecordsRequestEntry::builder()
                    .partition_key(&r.partition_key)
                    .data(Blob::new(r.data.to_vec()))
                    .build()
                    .map_err(|e| KinesisClientError::InvalidArgument(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .put_records()
            .stream_name(stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(KinesisClientError::from_sdk)?;

        // Result entries are returned in request order.
        let failures = records
            .iter()
            .zip(response.records())
            .filter_map(|(record, result)| {
                result.error_code().map(|code| RecordFailure {
                    record: record.clone(),
                    error_code: code.to_string(),
                    error_message: result.error_message().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(KinesisClientError::ThroughputExceeded.is_retryable());
        assert!(KinesisClientError::Timeout("slow".to_string()).is_retryable());
        assert!(!KinesisClientError::ExpiredIterator.is_retryable());
        assert!(!KinesisClientError::AccessDenied.is_retryable());
        assert!(!KinesisClientError::ResourceNotFound("stream".to_string()).is_retryable());
    }

    #[test]
    fn test_producer_record_from_str() {
        let record = ProducerRecord::new("key", "value");
        assert_eq!(record.partition_key, "key");
        assert_eq!(record.data, Bytes::from_static(b"value"));
    }
}
