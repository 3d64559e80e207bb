//! Consumer and producer configuration
//!
//! A [`ConsumerConfig`] can be built in code with the `with_*` setters or read
//! from a JSON document shaped like:
//!
//! ```json
//! {
//!   "app": "tail",
//!   "stream": "some-stream",
//!   "credentials": { "type": "static", "access_key_id": "...", "secret_access_key": "..." },
//!   "options": { "initial_position_in_stream": "TRIM_HORIZON", "max_records": 50 }
//! }
//! ```

use crate::error::ConfigError;
use crate::monitoring::MonitoringConfig;
use crate::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// The PutRecords API accepts at most this many records per request
pub const MAX_PUT_RECORDS_SIZE: usize = 500;

/// Largest `limit` GetRecords accepts
pub const MAX_GET_RECORDS_LIMIT: i32 = 10_000;

/// Specifies where to start reading a shard that has no checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialPosition {
    /// Start from the oldest available record
    TrimHorizon,
    /// Start after the newest record
    Latest,
    AtSequenceNumber(String),
    AtTimestamp(DateTime<Utc>),
}

/// Where AWS credentials come from
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    /// The SDK's default provider chain (environment, profile, instance role)
    #[default]
    Default,
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Default => f.write_str("Default"),
            Credentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"** redacted **")
                .finish(),
        }
    }
}

impl Credentials {
    /// Reads a `credentials` object. Missing or empty means the default chain,
    /// and a key pair without a `type` is taken as static credentials.
    pub fn from_json(value: Option<&Value>) -> Result<Self, ConfigError> {
        let value = match value {
            None | Some(Value::Null) => return Ok(Credentials::Default),
            Some(Value::Object(map)) if map.is_empty() => return Ok(Credentials::Default),
            Some(v) => v,
        };

        let mut value = value.clone();
        if let Value::Object(map) = &mut value {
            if !map.contains_key("type") {
                map.insert("type".to_string(), Value::String("static".to_string()));
            }
        }

        serde_json::from_value(value).map_err(|e| ConfigError::InvalidCredentials(e.to_string()))
    }
}

/// Configuration for a consumer [`Worker`](crate::consumer::Worker)
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Application name; names the checkpoint table
    pub app: String,
    pub stream: String,
    /// Identifies this process in logs
    pub worker_id: String,
    pub credentials: Credentials,
    pub region: Option<String>,
    pub initial_position: InitialPosition,
    /// Maximum number of records to request per GetRecords call
    pub max_records: i32,
    /// Pause after a GetRecords call that returned nothing
    pub idle_time_between_reads: Duration,
    pub call_process_records_even_for_empty_record_list: bool,
    /// How often the shard list is refreshed
    pub shard_sync_interval: Duration,
    /// Maximum number of shards processed concurrently (None for unlimited)
    pub max_concurrent_shards: Option<u32>,
    /// Timeout for each Kinesis API call
    pub api_timeout: Duration,
    /// Maximum time a single `process_records` call may take
    pub processing_timeout: Duration,
    /// Attempts made for a batch that fails softly (None for infinite)
    pub max_retries: Option<u32>,
    pub retry: RetryConfig,
    pub monitoring: MonitoringConfig,
}

impl ConsumerConfig {
    pub fn new(app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            stream: stream.into(),
            worker_id: default_worker_id(),
            credentials: Credentials::Default,
            region: None,
            initial_position: InitialPosition::Latest,
            max_records: MAX_GET_RECORDS_LIMIT,
            idle_time_between_reads: Duration::from_millis(1000),
            call_process_records_even_for_empty_record_list: false,
            shard_sync_interval: Duration::from_secs(60),
            max_concurrent_shards: None,
            api_timeout: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(300),
            max_retries: Some(3),
            retry: RetryConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let document = ConsumerDocument::deserialize(value)?;

        let mut config = Self::new(document.app, document.stream);
        config.credentials = Credentials::from_json(document.credentials.as_ref())?;
        if let Some(worker_id) = document.worker_id {
            config.worker_id = worker_id;
        }
        config.region = document.region;
        document.options.apply(&mut config)?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = position;
        self
    }

    pub fn with_max_records(mut self, max_records: i32) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_idle_time_between_reads(mut self, idle: Duration) -> Self {
        self.idle_time_between_reads = idle;
        self
    }

    pub fn with_call_process_records_even_for_empty_record_list(mut self, call: bool) -> Self {
        self.call_process_records_even_for_empty_record_list = call;
        self
    }

    pub fn with_shard_sync_interval(mut self, interval: Duration) -> Self {
        self.shard_sync_interval = interval;
        self
    }

    pub fn with_max_concurrent_shards(mut self, max: u32) -> Self {
        self.max_concurrent_shards = Some(max);
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.monitoring = monitoring;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.is_empty() {
            return Err(ConfigError::MissingKey("app"));
        }
        if self.stream.is_empty() {
            return Err(ConfigError::MissingKey("stream"));
        }
        if self.worker_id.is_empty() {
            return Err(ConfigError::MissingKey("worker_id"));
        }
        if !(1..=MAX_GET_RECORDS_LIMIT).contains(&self.max_records) {
            return Err(ConfigError::Invalid(format!(
                "max_records must be between 1 and {}, got {}",
                MAX_GET_RECORDS_LIMIT, self.max_records
            )));
        }
        if self.max_concurrent_shards == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent_shards must be greater than zero".to_string(),
            ));
        }
        if self.processing_timeout.is_zero() || self.api_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.monitoring.enabled && self.monitoring.channel_size == 0 {
            return Err(ConfigError::Invalid(
                "monitoring channel_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the shared AWS SDK configuration for this consumer's region and
    /// credentials.
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }

        if let Credentials::Static {
            access_key_id,
            secret_access_key,
        } = &self.credentials
        {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "telekinesis-static",
            ));
        }

        loader.load().await
    }
}

/// Configuration for [`AsyncProducer`](crate::producer::AsyncProducer)
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncProducerConfig {
    /// Capacity of the queue between callers and workers
    pub queue_size: usize,
    /// A partial batch is sent once nothing new arrived for this long
    pub send_every: Duration,
    /// Records per PutRecords call, at most [`MAX_PUT_RECORDS_SIZE`]
    pub send_size: usize,
    pub worker_count: usize,
    /// Attempts per PutRecords call
    pub retries: u32,
    pub retry_interval: Duration,
}

impl Default for AsyncProducerConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            send_every: Duration::from_millis(1000),
            send_size: MAX_PUT_RECORDS_SIZE,
            worker_count: 3,
            retries: 5,
            retry_interval: Duration::from_millis(1000),
        }
    }
}

impl AsyncProducerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be greater than zero".to_string()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be greater than zero".to_string()));
        }
        if self.send_size == 0 {
            return Err(ConfigError::Invalid("send_size must be greater than zero".to_string()));
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid("retries must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Batch size actually used, capped at the PutRecords limit
    pub fn effective_send_size(&self) -> usize {
        self.send_size.clamp(1, MAX_PUT_RECORDS_SIZE)
    }
}

/// Configuration for
/// [`AsyncSerializingProducer`](crate::producer::AsyncSerializingProducer)
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncSerializingProducerConfig {
    pub queue_size: usize,
    /// Each worker owns one serializer
    pub worker_count: usize,
    /// Attempts per blob
    pub retries: u32,
    pub retry_interval: Duration,
}

impl Default for AsyncSerializingProducerConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            worker_count: 3,
            retries: 5,
            retry_interval: Duration::from_millis(1000),
        }
    }
}

impl AsyncSerializingProducerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be greater than zero".to_string()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be greater than zero".to_string()));
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid("retries must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// A consumer configuration document before conversion
#[derive(Debug, Deserialize)]
struct ConsumerDocument {
    #[serde(default)]
    app: String,
    #[serde(default)]
    stream: String,
    worker_id: Option<String>,
    region: Option<String>,
    credentials: Option<Value>,
    #[serde(default)]
    options: ConsumerOptions,
}

/// KCL-style consumer options. Keys with no counterpart land in `unknown`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConsumerOptions {
    initial_position_in_stream: Option<String>,
    initial_position_timestamp: Option<String>,
    max_records: Option<u32>,
    idle_time_between_reads_in_millis: Option<u64>,
    call_process_records_even_for_empty_record_list: Option<bool>,
    shard_sync_interval_millis: Option<u64>,
    max_concurrent_shards: Option<u32>,
    api_timeout_millis: Option<u64>,
    processing_timeout_millis: Option<u64>,
    /// `null` means retry forever, so it is kept apart from a missing key
    #[serde(deserialize_with = "present")]
    max_retries: Option<Option<u32>>,
    region_name: Option<String>,
    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

impl ConsumerOptions {
    fn apply(self, config: &mut ConsumerConfig) -> Result<(), ConfigError> {
        for key in self.unknown.keys() {
            debug!(option = %key, "Ignoring unknown consumer option");
        }

        if let Some(position) = &self.initial_position_in_stream {
            let timestamp = self
                .initial_position_timestamp
                .as_deref()
                .map(parse_timestamp)
                .transpose()?;
            config.initial_position = parse_initial_position(position, timestamp)?;
        }
        if let Some(max) = self.max_records {
            config.max_records =
                i32::try_from(max).map_err(|_| out_of_range("max_records"))?;
        }
        if let Some(millis) = self.idle_time_between_reads_in_millis {
            config.idle_time_between_reads = Duration::from_millis(millis);
        }
        if let Some(call) = self.call_process_records_even_for_empty_record_list {
            config.call_process_records_even_for_empty_record_list = call;
        }
        if let Some(millis) = self.shard_sync_interval_millis {
            config.shard_sync_interval = Duration::from_millis(millis);
        }
        if let Some(max) = self.max_concurrent_shards {
            config.max_concurrent_shards = Some(max);
        }
        if let Some(millis) = self.api_timeout_millis {
            config.api_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = self.processing_timeout_millis {
            config.processing_timeout = Duration::from_millis(millis);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(region) = self.region_name {
            config.region = Some(region);
        }
        Ok(())
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ConfigError::InvalidOption {
            key: "initial_position_timestamp".to_string(),
            reason: e.to_string(),
        })
}

fn out_of_range(key: &str) -> ConfigError {
    ConfigError::InvalidOption {
        key: key.to_string(),
        reason: "value out of range".to_string(),
    }
}

fn parse_initial_position(
    position: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<InitialPosition, ConfigError> {
    match position {
        "TRIM_HORIZON" => Ok(InitialPosition::TrimHorizon),
        "LATEST" => Ok(InitialPosition::Latest),
        "AT_TIMESTAMP" => timestamp
            .map(InitialPosition::AtTimestamp)
            .ok_or_else(|| ConfigError::InvalidOption {
                key: "initial_position_in_stream".to_string(),
                reason: "AT_TIMESTAMP requires initial_position_timestamp".to_string(),
            }),
        other => Err(ConfigError::InvalidOption {
            key: "initial_position_in_stream".to_string(),
            reason: format!("unknown position {}", other),
        }),
    }
}

/// The host name, falling back to a random id when none can be found
fn default_worker_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("worker-{:08x}", rand::random::<u32>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_required_keys() {
        let err = ConsumerConfig::from_json(&json!({"stream": "s"})).unwrap_err();
        assert_eq!(err.to_string(), "app is required");

        let err = ConsumerConfig::from_json(&json!({"app": "a"})).unwrap_err();
        assert_eq!(err.to_string(), "stream is required");
    }

    #[test]
    fn test_build_with_only_required_args() {
        let config = ConsumerConfig::from_json_str(r#"{"app": "my-app", "stream": "an-stream"}"#)
            .expect("config should parse");

        assert_eq!(config.app, "my-app");
        assert_eq!(config.stream, "an-stream");
        assert_eq!(config.credentials, Credentials::Default);
        assert_eq!(config.initial_position, InitialPosition::Latest);
        assert_eq!(config.max_records, 10_000);
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_credentials() {
        let creds = Credentials::from_json(Some(&json!({}))).expect("empty is default");
        assert_eq!(creds, Credentials::Default);

        let creds = Credentials::from_json(Some(&json!({"type": "default"}))).expect("default");
        assert_eq!(creds, Credentials::Default);

        let expected = Credentials::Static {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
        };
        let creds = Credentials::from_json(Some(&json!({
            "access_key_id": "AKID",
            "secret_access_key": "secret"
        })))
        .expect("untyped key pair is static");
        assert_eq!(creds, expected);
        assert!(!format!("{:?}", creds).contains("secret\""));

        assert!(Credentials::from_json(Some(&json!({"type": "garbage"}))).is_err());
        assert!(Credentials::from_json(Some(&json!({"type": "static"}))).is_err());
    }

    #[test]
    fn test_options_are_applied() {
        let config = ConsumerConfig::from_json(&json!({
            "app": "my-app",
            "stream": "an-stream",
            "worker_id": "hostname.123",
            "options": {
                "initial_position_in_stream": "TRIM_HORIZON",
                "max_records": 50,
                "idle_time_between_reads_in_millis": 250,
                "call_process_records_even_for_empty_record_list": true,
                "max_retries": null,
                "task_backoff_time_millis": 1000
            }
        }))
        .expect("config should parse");

        assert_eq!(config.worker_id, "hostname.123");
        assert_eq!(config.initial_position, InitialPosition::TrimHorizon);
        assert_eq!(config.max_records, 50);
        assert_eq!(config.idle_time_between_reads, Duration::from_millis(250));
        assert!(config.call_process_records_even_for_empty_record_list);
        assert_eq!(config.max_retries, None);
    }

    #[test]
    fn test_at_timestamp_position() {
        let config = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {
                "initial_position_in_stream": "AT_TIMESTAMP",
                "initial_position_timestamp": "2024-01-02T03:04:05Z"
            }
        }))
        .expect("config should parse");

        let expected = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        assert_eq!(config.initial_position, InitialPosition::AtTimestamp(expected));

        let err = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {"initial_position_in_stream": "AT_TIMESTAMP"}
        }));
        assert!(matches!(err, Err(ConfigError::InvalidOption { .. })));
    }

    #[test]
    fn test_invalid_options() {
        let err = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {"initial_position_in_stream": "SOMEWHERE"}
        }));
        assert!(matches!(
            err,
            Err(ConfigError::InvalidOption { ref key, .. }) if key == "initial_position_in_stream"
        ));

        let err = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {"max_records": 0}
        }));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));

        let err = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {"max_records": "lots"}
        }));
        assert!(matches!(err, Err(ConfigError::Parse(_))));

        let err = ConsumerConfig::from_json(&json!({
            "app": "a",
            "stream": "s",
            "options": {"max_records": 20_000}
        }));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_async_producer_defaults() {
        let config = AsyncProducerConfig::default();
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.effective_send_size(), 500);
        assert!(config.validate().is_ok());

        let oversized = AsyncProducerConfig {
            send_size: 5000,
            ..Default::default()
        };
        assert_eq!(oversized.effective_send_size(), MAX_PUT_RECORDS_SIZE);

        let no_workers = AsyncProducerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(no_workers.validate().is_err());
    }
}
