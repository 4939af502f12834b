//! Kafka record types.
//!
//! Outbound records are built by the caller and consumed once by a send;
//! consumed records are produced by a poll and forwarded to the caller
//! unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record headers: header name to optional value bytes.
pub type Headers = BTreeMap<String, Option<Vec<u8>>>;

/// A record to publish.
///
/// A missing key or value passes through as-is (keyless records, tombstones).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerMessage {
    pub topic: String,
    /// Explicit partition; the producer's partitioner picks one when unset
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    #[serde(default)]
    pub headers: Headers,
    /// Explicit record timestamp in milliseconds since epoch
    pub timestamp: Option<i64>,
}

impl ProducerMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value);
        self
    }
}

/// Broker acknowledgement for one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSendResult {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Record timestamp in milliseconds since epoch
    pub timestamp: i64,
}

/// One delivered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    #[serde(default)]
    pub headers: Headers,
}
