use async_trait::async_trait;
use kafka_types::{ConsumedMessage, Headers as MessageHeaders};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::blocking;
use crate::error::{Error, Result};
use crate::ports::KafkaConsumerClient;

/// Manually assigned partitions and the position each one starts from.
///
/// Seeks are applied by assigning again with explicit offsets, which works
/// before the first fetch as well as after it.
#[derive(Debug, Clone)]
struct Assignment {
    topic: String,
    offsets: BTreeMap<i32, Offset>,
}

impl Assignment {
    fn to_list(&self) -> Result<TopicPartitionList> {
        let mut list = TopicPartitionList::new();
        for (partition, offset) in &self.offsets {
            list.add_partition_offset(&self.topic, *partition, *offset)?;
        }
        Ok(list)
    }
}

/// Consumer capability over an rdkafka [`BaseConsumer`] with manual assignment.
pub struct RdKafkaConsumerClient {
    consumer: Arc<BaseConsumer>,
    assignment: Mutex<Option<Assignment>>,
    max_poll_records: usize,
    request_timeout: Duration,
}

impl RdKafkaConsumerClient {
    pub fn new(config: &ClientConfig, max_poll_records: usize, request_timeout: Duration) -> Result<Self> {
        let consumer: BaseConsumer = config
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;
        Ok(Self {
            consumer: Arc::new(consumer),
            assignment: Mutex::new(None),
            max_poll_records: max_poll_records.max(1),
            request_timeout,
        })
    }

    fn lock_assignment(&self) -> Result<MutexGuard<'_, Option<Assignment>>> {
        self.assignment
            .lock()
            .map_err(|_| Error::Consumer("Assignment state poisoned".to_string()))
    }

    fn topic(&self) -> Result<String> {
        self.lock_assignment()?
            .as_ref()
            .map(|a| a.topic.clone())
            .ok_or(Error::PartitionsNotAssigned)
    }

    /// Update the start offset of `partitions` and assign again.
    fn reposition(&self, partitions: impl IntoIterator<Item = (i32, Offset)>) -> Result<()> {
        let mut guard = self.lock_assignment()?;
        let assignment = guard.as_mut().ok_or(Error::PartitionsNotAssigned)?;
        for (partition, offset) in partitions {
            if !assignment.offsets.contains_key(&partition) {
                return Err(Error::Consumer(format!(
                    "Partition {partition} of {} is not assigned",
                    assignment.topic
                )));
            }
            assignment.offsets.insert(partition, offset);
        }
        self.consumer.assign(&assignment.to_list()?)?;
        Ok(())
    }

    fn partition_list(&self, partitions: &BTreeSet<i32>) -> Result<TopicPartitionList> {
        let topic = self.topic()?;
        let mut list = TopicPartitionList::new();
        for partition in partitions {
            list.add_partition(&topic, *partition);
        }
        Ok(list)
    }
}

fn consumed_message(message: &BorrowedMessage<'_>) -> ConsumedMessage {
    let headers: MessageHeaders = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec)))
                .collect()
        })
        .unwrap_or_default();

    ConsumedMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

#[async_trait]
impl KafkaConsumerClient for RdKafkaConsumerClient {
    async fn partitions_for(&self, topic: &str) -> Result<BTreeSet<i32>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.request_timeout;
        let topic = topic.to_string();
        blocking(move || {
            let metadata = consumer.fetch_metadata(Some(&topic), timeout)?;
            let Some(found) = metadata.topics().iter().find(|t| t.name() == topic) else {
                return Err(Error::TopicNotFound(topic));
            };
            if found.error().is_some() {
                return Err(Error::TopicNotFound(topic));
            }
            Ok(found.partitions().iter().map(|p| p.id()).collect())
        })
        .await
    }

    async fn assign(&self, topic: &str, partitions: &BTreeSet<i32>) -> Result<()> {
        let assignment = Assignment {
            topic: topic.to_string(),
            offsets: partitions.iter().map(|p| (*p, Offset::Stored)).collect(),
        };
        self.consumer.assign(&assignment.to_list()?)?;
        *self.lock_assignment()? = Some(assignment);
        Ok(())
    }

    async fn seek_to_beginning(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.reposition(partitions.iter().map(|p| (*p, Offset::Beginning)))
    }

    async fn seek_to_end(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.reposition(partitions.iter().map(|p| (*p, Offset::End)))
    }

    async fn seek(&self, partition: i32, offset: i64) -> Result<()> {
        self.reposition([(partition, Offset::Offset(offset))])
    }

    async fn offsets_for_times(
        &self,
        timestamps: &BTreeMap<i32, i64>,
    ) -> Result<BTreeMap<i32, Option<i64>>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.request_timeout;
        let topic = self.topic()?;
        let timestamps = timestamps.clone();
        blocking(move || {
            let mut query = TopicPartitionList::new();
            for (partition, timestamp) in &timestamps {
                query.add_partition_offset(&topic, *partition, Offset::Offset(*timestamp))?;
            }
            let found = consumer.offsets_for_times(query, timeout)?;
            Ok(found
                .elements()
                .iter()
                .map(|elem| {
                    let offset = match elem.offset() {
                        Offset::Offset(offset) if offset >= 0 => Some(offset),
                        _ => None,
                    };
                    (elem.partition(), offset)
                })
                .collect())
        })
        .await
    }

    async fn end_offsets(&self, partitions: &BTreeSet<i32>) -> Result<BTreeMap<i32, i64>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.request_timeout;
        let topic = self.topic()?;
        let partitions = partitions.clone();
        blocking(move || {
            partitions
                .into_iter()
                .map(|partition| {
                    let (_low, high) = consumer.fetch_watermarks(&topic, partition, timeout)?;
                    Ok((partition, high))
                })
                .collect()
        })
        .await
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<ConsumedMessage>> {
        let consumer = Arc::clone(&self.consumer);
        let max_records = self.max_poll_records;
        blocking(move || {
            let mut batch = Vec::new();
            // Wait for the first record only; the rest are whatever is already fetched.
            let mut wait = timeout;
            while batch.len() < max_records {
                match consumer.poll(wait) {
                    Some(Ok(message)) => batch.push(consumed_message(&message)),
                    Some(Err(e)) if batch.is_empty() => return Err(e.into()),
                    Some(Err(e)) => {
                        debug!("Stopping batch early on consumer error: {e}");
                        break;
                    }
                    None => break,
                }
                wait = Duration::ZERO;
            }
            Ok(batch)
        })
        .await
    }

    async fn pause(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.consumer.pause(&self.partition_list(partitions)?)?;
        Ok(())
    }

    async fn resume(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.consumer.resume(&self.partition_list(partitions)?)?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        blocking(move || match consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing consumed yet, so nothing to commit.
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.lock_assignment()?.take();
        self.consumer.unassign()?;
        Ok(())
    }
}
