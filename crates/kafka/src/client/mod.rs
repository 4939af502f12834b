//! rdkafka-backed implementations of the broker capabilities in [`crate::ports`].
//!
//! librdkafka calls that block the calling thread (metadata, offset lookups,
//! polling, synchronous commits) run on tokio's blocking pool. Their results
//! are converted to owned values before leaving that thread.

mod admin;
mod consumer;
mod producer;

pub use admin::RdKafkaAdminClient;
pub use consumer::RdKafkaConsumerClient;
pub use producer::RdKafkaProducerClient;

use kafka_types::{ConnectionConfig, ConsumerSessionRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{client_config, consumer_client_config, DEFAULT_OPERATION_TIMEOUT};
use crate::error::Result;
use crate::ports::{
    KafkaAdminClient, KafkaAdminClientFactory, KafkaConsumerClient, KafkaConsumerClientFactory,
    KafkaProducerClient, KafkaProducerClientFactory,
};

/// Creates rdkafka admin, producer, and consumer clients.
#[derive(Debug, Clone, Copy)]
pub struct RdKafkaClientFactory {
    request_timeout: Duration,
}

impl RdKafkaClientFactory {
    /// `request_timeout` bounds each individual librdkafka request.
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for RdKafkaClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_TIMEOUT)
    }
}

impl KafkaAdminClientFactory for RdKafkaClientFactory {
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaAdminClient>> {
        debug!("Creating rdkafka admin client");
        let client = RdKafkaAdminClient::new(&client_config(connection), self.request_timeout)?;
        Ok(Arc::new(client))
    }
}

impl KafkaProducerClientFactory for RdKafkaClientFactory {
    fn create(&self, connection: &ConnectionConfig) -> Result<Arc<dyn KafkaProducerClient>> {
        debug!("Creating rdkafka producer client");
        let client = RdKafkaProducerClient::new(&client_config(connection), self.request_timeout)?;
        Ok(Arc::new(client))
    }
}

impl KafkaConsumerClientFactory for RdKafkaClientFactory {
    fn create(
        &self,
        connection: &ConnectionConfig,
        request: &ConsumerSessionRequest,
    ) -> Result<Arc<dyn KafkaConsumerClient>> {
        debug!("Creating rdkafka consumer client for {}", request.topic);
        let client = RdKafkaConsumerClient::new(
            &consumer_client_config(connection, request),
            request.max_poll_records,
            self.request_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

/// Run a blocking librdkafka call on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}
