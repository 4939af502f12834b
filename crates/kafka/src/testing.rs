//! In-memory broker capabilities for unit tests.
//!
//! Consumer fakes append every call to a shared [`CallLog`] as
//! `"<label>:<call>"`, so tests can assert ordering across clients
//! (for example that one session's close happens before the next one's first poll).

use async_trait::async_trait;
use kafka_types::{
    ConnectionConfig, ConsumedMessage, ProducerMessage, ProducerSendResult, TopicDescription,
    TopicPartitionDescription, TopicSummary,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ports::{KafkaAdminClient, KafkaConsumerClient, KafkaProducerClient};

pub(crate) fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig::new(["localhost:9092"]).with_client_id("light-kafka-test")
}

pub(crate) fn record(topic: &str, partition: i32, offset: i64) -> ConsumedMessage {
    ConsumedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        timestamp: Some(1_700_000_000_000 + offset),
        key: Some(format!("k{offset}").into_bytes()),
        value: Some(format!("v{offset}").into_bytes()),
        headers: BTreeMap::new(),
    }
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Default)]
pub(crate) struct FakeAdminClient {
    summaries: Vec<TopicSummary>,
    descriptions: BTreeMap<String, TopicDescription>,
    delay: Option<Duration>,
    describe_calls: AtomicUsize,
    close_count: AtomicUsize,
}

impl FakeAdminClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a topic with `partitions` partitions, all led by broker 1.
    pub(crate) fn with_topic(mut self, name: &str, internal: bool, partitions: i32) -> Self {
        self.summaries.push(TopicSummary {
            name: name.to_string(),
            partitions: partitions as usize,
            internal,
        });
        self.descriptions.insert(
            name.to_string(),
            TopicDescription {
                name: name.to_string(),
                internal,
                partitions: (0..partitions)
                    .map(|partition| TopicPartitionDescription {
                        partition,
                        leader: Some(1),
                        replicas: vec![1],
                        in_sync_replicas: vec![1],
                    })
                    .collect(),
                configs: BTreeMap::new(),
            },
        );
        self
    }

    pub(crate) fn with_description(mut self, description: TopicDescription) -> Self {
        self.descriptions
            .insert(description.name.clone(), description);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl KafkaAdminClient for FakeAdminClient {
    // Returns every registered topic; filtering is left to the service.
    async fn list_topics(&self, _include_internal: bool) -> Result<Vec<TopicSummary>> {
        self.maybe_delay().await;
        Ok(self.summaries.clone())
    }

    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicDescription>> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        names
            .iter()
            .map(|name| {
                self.descriptions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::TopicNotFound(name.clone()))
            })
            .collect()
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Producer
// ============================================================================

enum SendBehavior {
    Ack {
        partition: i32,
        offset: i64,
        timestamp: i64,
    },
    Fail(String),
}

pub(crate) struct FakeProducerClient {
    behavior: SendBehavior,
    delay: Option<Duration>,
    sent: Mutex<Vec<ProducerMessage>>,
    close_count: AtomicUsize,
}

impl FakeProducerClient {
    pub(crate) fn acking(partition: i32, offset: i64, timestamp: i64) -> Self {
        Self::with_behavior(SendBehavior::Ack {
            partition,
            offset,
            timestamp,
        })
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self::with_behavior(SendBehavior::Fail(reason.to_string()))
    }

    fn with_behavior(behavior: SendBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            sent: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn sent(&self) -> Vec<ProducerMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KafkaProducerClient for FakeProducerClient {
    async fn send(&self, message: ProducerMessage) -> Result<ProducerSendResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            SendBehavior::Ack {
                partition,
                offset,
                timestamp,
            } => {
                let topic = message.topic.clone();
                self.sent.lock().unwrap().push(message);
                Ok(ProducerSendResult {
                    topic,
                    partition: *partition,
                    offset: *offset,
                    timestamp: *timestamp,
                })
            }
            SendBehavior::Fail(reason) => Err(Error::Producer(reason.clone())),
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Ordered record of consumer calls, shared between fakes.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

pub(crate) struct FakeConsumerClient {
    label: String,
    log: CallLog,
    available_partitions: BTreeSet<i32>,
    batches: Mutex<VecDeque<Result<Vec<ConsumedMessage>>>>,
    offsets_for_times: BTreeMap<i32, Option<i64>>,
    end_offsets: BTreeMap<i32, i64>,
    fail_partitions_for: bool,
    wait_on_empty_poll: bool,
    last_poll_timeout: Mutex<Option<Duration>>,
}

impl FakeConsumerClient {
    pub(crate) fn new(label: &str, log: CallLog, partitions: impl IntoIterator<Item = i32>) -> Self {
        Self {
            label: label.to_string(),
            log,
            available_partitions: partitions.into_iter().collect(),
            batches: Mutex::new(VecDeque::new()),
            offsets_for_times: BTreeMap::new(),
            end_offsets: BTreeMap::new(),
            fail_partitions_for: false,
            wait_on_empty_poll: false,
            last_poll_timeout: Mutex::new(None),
        }
    }

    /// Queue a batch for a future poll. Polls with nothing queued return an empty batch.
    pub(crate) fn with_batch(self, batch: Vec<ConsumedMessage>) -> Self {
        self.batches.lock().unwrap().push_back(Ok(batch));
        self
    }

    pub(crate) fn with_poll_error(self, reason: &str) -> Self {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(Error::Consumer(reason.to_string())));
        self
    }

    pub(crate) fn with_offsets_for_times(mut self, offsets: BTreeMap<i32, Option<i64>>) -> Self {
        self.offsets_for_times = offsets;
        self
    }

    pub(crate) fn with_end_offsets(mut self, offsets: BTreeMap<i32, i64>) -> Self {
        self.end_offsets = offsets;
        self
    }

    pub(crate) fn failing_partition_lookup(mut self) -> Self {
        self.fail_partitions_for = true;
        self
    }

    /// Polls with nothing queued wait out their full timeout, like a broker with no new records.
    pub(crate) fn waiting_on_empty_poll(mut self) -> Self {
        self.wait_on_empty_poll = true;
        self
    }

    pub(crate) fn last_poll_timeout(&self) -> Option<Duration> {
        *self.last_poll_timeout.lock().unwrap()
    }

    fn record(&self, call: impl std::fmt::Display) {
        self.log.push(format!("{}:{call}", self.label));
    }
}

fn join(partitions: &BTreeSet<i32>) -> String {
    partitions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl KafkaConsumerClient for FakeConsumerClient {
    async fn partitions_for(&self, topic: &str) -> Result<BTreeSet<i32>> {
        self.record(format!("partitions_for:{topic}"));
        if self.fail_partitions_for {
            return Err(Error::Consumer("metadata request failed".to_string()));
        }
        Ok(self.available_partitions.clone())
    }

    async fn assign(&self, topic: &str, partitions: &BTreeSet<i32>) -> Result<()> {
        self.record(format!("assign:{topic}:{}", join(partitions)));
        Ok(())
    }

    async fn seek_to_beginning(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.record(format!("seek_to_beginning:{}", join(partitions)));
        Ok(())
    }

    async fn seek_to_end(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.record(format!("seek_to_end:{}", join(partitions)));
        Ok(())
    }

    async fn seek(&self, partition: i32, offset: i64) -> Result<()> {
        self.record(format!("seek:{partition}:{offset}"));
        Ok(())
    }

    async fn offsets_for_times(
        &self,
        timestamps: &BTreeMap<i32, i64>,
    ) -> Result<BTreeMap<i32, Option<i64>>> {
        self.record("offsets_for_times");
        Ok(timestamps
            .keys()
            .map(|p| (*p, self.offsets_for_times.get(p).copied().flatten()))
            .collect())
    }

    async fn end_offsets(&self, partitions: &BTreeSet<i32>) -> Result<BTreeMap<i32, i64>> {
        self.record(format!("end_offsets:{}", join(partitions)));
        Ok(partitions
            .iter()
            .map(|p| (*p, self.end_offsets.get(p).copied().unwrap_or(0)))
            .collect())
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<ConsumedMessage>> {
        self.record("poll");
        *self.last_poll_timeout.lock().unwrap() = Some(timeout);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                if self.wait_on_empty_poll {
                    tokio::time::sleep(timeout).await;
                }
                Ok(Vec::new())
            }
        }
    }

    async fn pause(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.record(format!("pause:{}", join(partitions)));
        Ok(())
    }

    async fn resume(&self, partitions: &BTreeSet<i32>) -> Result<()> {
        self.record(format!("resume:{}", join(partitions)));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.record("commit");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}
