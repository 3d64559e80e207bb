//! Test data builders and mock implementations of the client, store and processor


use crate::client::RecordBatch;
use aws_sdk_kinesis::types::{Record, Shard};

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> Record {
        Record::builder()
            .sequence_number(sequence_number)
            .data(aws_smithy_types::Blob::new(data.to_vec()))
            .partition_key("test-partition-key")
            .build()
            .expect("Failed to build test record")
    }

    pub fn create_test_shard(shard_id: &str) -> Shard {
        Shard::builder()
            .shard_id(shard_id)
            .build()
            .expect("Failed to build test shard")
    }

    /// A shard produced by splitting `parent_id`
    pub fn create_child_shard(shard_id: &str, parent_id: &str) -> Shard {
        Shard::builder()
            .shard_id(shard_id)
            .parent_shard_id(parent_id)
            .build()
            .expect("Failed to build test shard")
    }

    /// Records `sequence-0` through `sequence-{count - 1}`
    pub fn create_test_records(count: usize) -> Vec<Record> {
        Self::create_test_records_from(0, count)
    }

    pub fn create_test_records_from(start: usize, count: usize) -> Vec<Record> {
        (start..start + count)
            .map(|i| {
                Self::create_test_record(
                    &format!("sequence-{}", i),
                    format!("data-{}", i).as_bytes(),
                )
            })
            .collect()
    }

    /// A GetRecords response; `next_iterator` of `None` closes the shard
    pub fn record_batch(records: Vec<Record>, next_iterator: Option<&str>) -> RecordBatch {
        RecordBatch {
            records,
            next_iterator: next_iterator.map(str::to_string),
            millis_behind_latest: Some(0),
        }
    }

    pub fn sequence_numbers(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.sequence_number().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_record() {
        let record = TestUtils::create_test_record("seq-1", b"test-data");
        assert_eq!(record.sequence_number(), "seq-1");
        assert_eq!(record.data().as_ref(), b"test-data");
        assert_eq!(record.partition_key(), "test-partition-key");
    }

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records_from(2, 3);
        assert_eq!(
            TestUtils::sequence_numbers(&records),
            vec!["sequence-2", "sequence-3", "sequence-4"]
        );
        assert_eq!(records[0].data().as_ref(), b"data-2");
    }

    #[test]
    fn test_child_shard() {
        let shard = TestUtils::create_child_shard("shard-2", "shard-1");
        assert_eq!(shard.parent_shard_id(), Some("shard-1"));
        assert_eq!(shard.adjacent_parent_shard_id(), None);
    }
}
