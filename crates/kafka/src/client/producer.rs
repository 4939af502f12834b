use async_trait::async_trait;
use kafka_types::{ProducerMessage, ProducerSendResult};
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Message, OwnedHeaders, Timestamp};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::blocking;
use crate::error::{Error, Result};
use crate::ports::KafkaProducerClient;

/// Wait before retrying a send rejected because the local queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Where and when the broker stored a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Delivered {
    partition: i32,
    offset: i64,
    timestamp: i64,
}

type DeliveryReply = oneshot::Sender<std::result::Result<Delivered, KafkaError>>;

/// Hands each delivery report back to the task awaiting it.
struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<DeliveryReply>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, reply: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(message) => Ok(Delivered {
                partition: message.partition(),
                offset: message.offset(),
                timestamp: broker_timestamp(message.timestamp()),
            }),
            Err((e, _)) => Err(e.clone()),
        };
        // The sender is gone once its operation timed out.
        let _ = reply.send(outcome);
    }
}

/// Stored record timestamp in epoch millis, or -1 when the broker reported none.
fn broker_timestamp(timestamp: Timestamp) -> i64 {
    timestamp.to_millis().unwrap_or(-1)
}

/// Producer capability over an rdkafka [`ThreadedProducer`].
///
/// The acknowledged timestamp is read from the delivery report, so it is the
/// broker's log-append time on topics configured for it and the create time
/// otherwise.
pub struct RdKafkaProducerClient {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
    request_timeout: Duration,
}

impl RdKafkaProducerClient {
    pub fn new(config: &ClientConfig, request_timeout: Duration) -> Result<Self> {
        let producer: ThreadedProducer<DeliveryContext> = config
            .create_with_context(DeliveryContext)
            .map_err(|e| Error::Producer(format!("Failed to create producer: {e}")))?;
        Ok(Self {
            producer: Arc::new(producer),
            request_timeout,
        })
    }
}

fn owned_headers(message: &ProducerMessage) -> OwnedHeaders {
    message
        .headers
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: value.as_deref(),
            })
        })
}

#[async_trait]
impl KafkaProducerClient for RdKafkaProducerClient {
    async fn send(&self, message: ProducerMessage) -> Result<ProducerSendResult> {
        let (reply, delivered) = oneshot::channel();

        let mut record = BaseRecord::<[u8], [u8], Box<DeliveryReply>>::with_opaque_to(
            &message.topic,
            Box::new(reply),
        )
        .headers(owned_headers(&message));
        if let Some(partition) = message.partition {
            record = record.partition(partition);
        }
        if let Some(timestamp) = message.timestamp {
            record = record.timestamp(timestamp);
        }
        if let Some(key) = &message.key {
            record = record.key(key.as_slice());
        }
        if let Some(value) = &message.value {
            record = record.payload(value.as_slice());
        }

        loop {
            match self.producer.send(record) {
                Ok(()) => break,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    warn!("Producer queue is full, retrying in {QUEUE_FULL_BACKOFF:?}");
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => return Err(e.into()),
            }
        }

        let Delivered {
            partition,
            offset,
            timestamp,
        } = delivered
            .await
            .map_err(|_| Error::Producer("Delivery report was dropped".to_string()))??;

        debug!("Delivered to {} [{partition}] at offset {offset}", message.topic);
        Ok(ProducerSendResult {
            topic: message.topic,
            partition,
            offset,
            timestamp,
        })
    }

    async fn close(&self) -> Result<()> {
        let producer = Arc::clone(&self.producer);
        let timeout = self.request_timeout;
        blocking(move || {
            producer.flush(timeout)?;
            Ok(())
        })
        .await
    }
}
