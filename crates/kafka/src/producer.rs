//! Single-record production.

use kafka_types::{ConnectionConfig, ProducerMessage, ProducerSendResult, ServiceResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::RdKafkaClientFactory;
use crate::error::{Error, Result};
use crate::lazy::LazyClient;
use crate::ports::{KafkaProducerClient, KafkaProducerClientFactory};
use crate::runner::run_with_timeout;

/// Sends records through one lazily created producer client.
pub struct ProducerService {
    connection: ConnectionConfig,
    factory: Arc<dyn KafkaProducerClientFactory>,
    operation_timeout: Duration,
    client: LazyClient<dyn KafkaProducerClient>,
}

impl ProducerService {
    /// Producer service backed by rdkafka.
    pub fn new(connection: ConnectionConfig, operation_timeout: Duration) -> Self {
        Self::with_factory(
            connection,
            RdKafkaClientFactory::new(operation_timeout),
            operation_timeout,
        )
    }

    pub fn with_factory<F>(connection: ConnectionConfig, factory: F, operation_timeout: Duration) -> Self
    where
        F: KafkaProducerClientFactory + 'static,
    {
        Self {
            connection,
            factory: Arc::new(factory),
            operation_timeout,
            client: LazyClient::new(),
        }
    }

    /// Submit one record and wait for the broker acknowledgement.
    pub async fn send(&self, message: ProducerMessage) -> ServiceResult<ProducerSendResult> {
        run_with_timeout("send message", self.operation_timeout, async {
            let client = self.client().await?;
            let topic = message.topic.clone();
            let result = client.send(message).await?;
            debug!(
                "Sent message to {topic} partition {} at offset {}",
                result.partition, result.offset
            );
            Ok::<_, Error>(result)
        })
        .await
    }

    /// Flush outstanding sends and release the client.
    pub async fn close(&self) -> ServiceResult<()> {
        let Some(client) = self.client.take().await else {
            return Ok(());
        };
        info!("Closing Kafka producer client");
        run_with_timeout("close producer client", self.operation_timeout, client.close()).await
    }

    async fn client(&self) -> Result<Arc<dyn KafkaProducerClient>> {
        self.client
            .get_or_create(|| {
                info!(
                    "Creating Kafka producer client for {}",
                    self.connection.bootstrap_servers_string()
                );
                self.factory.create(&self.connection)
            })
            .await
    }
}
