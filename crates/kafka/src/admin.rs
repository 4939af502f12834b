//! Topic administration.

use kafka_types::{ConnectionConfig, ServiceResult, TopicDescription, TopicSummary};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::RdKafkaClientFactory;
use crate::error::{Error, Result};
use crate::lazy::LazyClient;
use crate::ports::{KafkaAdminClient, KafkaAdminClientFactory};
use crate::runner::run_with_timeout;

/// Lists and describes topics through one lazily created admin client.
pub struct AdminService {
    connection: ConnectionConfig,
    factory: Arc<dyn KafkaAdminClientFactory>,
    operation_timeout: Duration,
    client: LazyClient<dyn KafkaAdminClient>,
}

impl AdminService {
    /// Admin service backed by rdkafka.
    pub fn new(connection: ConnectionConfig, operation_timeout: Duration) -> Self {
        Self::with_factory(
            connection,
            RdKafkaClientFactory::new(operation_timeout),
            operation_timeout,
        )
    }

    pub fn with_factory<F>(connection: ConnectionConfig, factory: F, operation_timeout: Duration) -> Self
    where
        F: KafkaAdminClientFactory + 'static,
    {
        Self {
            connection,
            factory: Arc::new(factory),
            operation_timeout,
            client: LazyClient::new(),
        }
    }

    /// Topics sorted by name, with their partition counts.
    pub async fn list_topics(&self, include_internal: bool) -> ServiceResult<Vec<TopicSummary>> {
        run_with_timeout("list topics", self.operation_timeout, async {
            let client = self.client().await?;
            let mut topics: Vec<TopicSummary> = client
                .list_topics(include_internal)
                .await?
                .into_iter()
                .filter(|topic| include_internal || !topic.internal)
                .collect();
            topics.sort_by(|a, b| a.name.cmp(&b.name));

            debug!("Listed {} topics", topics.len());
            Ok::<_, Error>(topics)
        })
        .await
    }

    /// Partition leadership, replicas, in-sync replicas, and topic configuration.
    pub async fn describe_topic(&self, name: &str) -> ServiceResult<TopicDescription> {
        run_with_timeout("describe topic", self.operation_timeout, async {
            let client = self.client().await?;
            client
                .describe_topics(&[name.to_string()])
                .await?
                .into_iter()
                .find(|description| description.name == name)
                .ok_or_else(|| Error::TopicNotFound(name.to_string()))
        })
        .await
    }

    /// Close and drop the cached client. Safe to call when no client was ever created.
    ///
    /// For the rdkafka client `close` has nothing to flush; the underlying
    /// handle is destroyed when this last reference is dropped on return.
    /// A later call creates a fresh client.
    pub async fn close(&self) -> ServiceResult<()> {
        let Some(client) = self.client.take().await else {
            return Ok(());
        };
        info!("Closing Kafka admin client");
        run_with_timeout("close admin client", self.operation_timeout, client.close()).await
    }

    async fn client(&self) -> Result<Arc<dyn KafkaAdminClient>> {
        self.client
            .get_or_create(|| {
                info!(
                    "Creating Kafka admin client for {}",
                    self.connection.bootstrap_servers_string()
                );
                self.factory.create(&self.connection)
            })
            .await
    }
}
