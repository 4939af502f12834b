//! Topic metadata returned by the administration service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One topic's shape, as shown in a topic listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub partitions: usize,
    pub internal: bool,
}

/// Leadership and replication detail for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionDescription {
    pub partition: i32,
    /// Broker id of the current leader, if the partition has one
    pub leader: Option<i32>,
    pub replicas: Vec<i32>,
    pub in_sync_replicas: Vec<i32>,
}

/// Full topic metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescription {
    pub name: String,
    pub internal: bool,
    /// Ordered by partition id
    pub partitions: Vec<TopicPartitionDescription>,
    /// Topic-level configuration entries; entries without a value are omitted
    pub configs: BTreeMap<String, String>,
}
