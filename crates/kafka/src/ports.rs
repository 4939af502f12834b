//! Broker capabilities the services depend on.
//!
//! Each capability is a narrow async trait satisfied by whatever Kafka client
//! is linked in; [`crate::client::RdKafkaClientFactory`] provides the rdkafka
//! implementation. Factories are plain traits so any matching closure works
//! as one, which is how tests inject fakes.

use async_trait::async_trait;
use kafka_types::{
    ConnectionConfig, ConsumedMessage, ConsumerSessionRequest, ProducerMessage,
    ProducerSendResult, TopicDescription, TopicSummary,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait KafkaAdminClient: Send + Sync {
    /// Topic names, partition counts, and internal flags, from cluster metadata only.
    /// Internal topics are omitted unless requested.
    async fn list_topics(&self, include_internal: bool) -> Result<Vec<TopicSummary>>;

    /// Partition detail and configuration for each named topic, in the order requested.
    ///
    /// Fails with `Error::TopicNotFound` if any of the topics does not exist.
    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicDescription>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait KafkaProducerClient: Send + Sync {
    /// Publish one record and wait for its acknowledgement.
    async fn send(&self, message: ProducerMessage) -> Result<ProducerSendResult>;

    /// Flush outstanding sends, then release the client.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait KafkaConsumerClient: Send + Sync {
    async fn partitions_for(&self, topic: &str) -> Result<BTreeSet<i32>>;

    async fn assign(&self, topic: &str, partitions: &BTreeSet<i32>) -> Result<()>;

    async fn seek_to_beginning(&self, partitions: &BTreeSet<i32>) -> Result<()>;

    async fn seek_to_end(&self, partitions: &BTreeSet<i32>) -> Result<()>;

    async fn seek(&self, partition: i32, offset: i64) -> Result<()>;

    /// Earliest offset whose timestamp is at or after the given one, per partition.
    /// `None` when the partition has no such record.
    async fn offsets_for_times(
        &self,
        timestamps: &BTreeMap<i32, i64>,
    ) -> Result<BTreeMap<i32, Option<i64>>>;

    async fn end_offsets(&self, partitions: &BTreeSet<i32>) -> Result<BTreeMap<i32, i64>>;

    /// Records in the order the broker returned them; empty when none arrived in time.
    async fn poll(&self, timeout: Duration) -> Result<Vec<ConsumedMessage>>;

    async fn pause(&self, partitions: &BTreeSet<i32>) -> Result<()>;

    async fn resume(&self, partitions: &BTreeSet<i32>) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub trait KafkaAdminClientFactory: Send + Sync {
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaAdminClient>>;
}

pub trait KafkaProducerClientFactory: Send + Sync {
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaProducerClient>>;
}

pub trait KafkaConsumerClientFactory: Send + Sync {
    fn create(
        &self,
        connection: &ConnectionConfig,
        request: &ConsumerSessionRequest,
    ) -> Result<Arc<dyn KafkaConsumerClient>>;
}

impl<F> KafkaAdminClientFactory for F
where
    F: Fn(&ConnectionConfig) -> Result<Arc<dyn KafkaAdminClient>> + Send + Sync,
{
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaAdminClient>> {
        self(connection)
    }
}

impl<F> KafkaProducerClientFactory for F
where
    F: Fn(&ConnectionConfig) -> Result<Arc<dyn KafkaProducerClient>> + Send + Sync,
{
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaProducerClient>> {
        self(connection)
    }
}

impl<F> KafkaConsumerClientFactory for F
where
    F: Fn(&ConnectionConfig, &ConsumerSessionRequest) -> Result<Arc<dyn KafkaConsumerClient>>
        + Send
        + Sync,
{
    fn create(
        &self,
        connection: &ConnectionConfig,
        request: &ConsumerSessionRequest,
    ) -> Result<Arc<dyn KafkaConsumerClient>> {
        self(connection, request)
    }
}
