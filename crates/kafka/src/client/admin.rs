use async_trait::async_trait;
use kafka_types::{TopicDescription, TopicPartitionDescription, TopicSummary};
use rdkafka::admin::{AdminClient, AdminOptions, OwnedResourceSpecifier, ResourceSpecifier};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::metadata::MetadataTopic;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::blocking;
use crate::error::{Error, Result};
use crate::ports::KafkaAdminClient;

/// Broker-side topics are recognised by their reserved prefix; cluster
/// metadata carries no internal flag.
fn is_internal_topic(name: &str) -> bool {
    name.starts_with("__")
}

/// Admin capability over an rdkafka [`AdminClient`].
pub struct RdKafkaAdminClient {
    admin: Arc<AdminClient<DefaultClientContext>>,
    request_timeout: Duration,
}

impl RdKafkaAdminClient {
    pub fn new(config: &ClientConfig, request_timeout: Duration) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = config
            .create()
            .map_err(|e| Error::Admin(format!("Failed to create admin client: {e}")))?;
        Ok(Self {
            admin: Arc::new(admin),
            request_timeout,
        })
    }

    /// Partition layout of every topic in the cluster, keyed by name.
    async fn cluster_topics(&self) -> Result<HashMap<String, Vec<TopicPartitionDescription>>> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.request_timeout;
        blocking(move || {
            let metadata = admin.inner().fetch_metadata(None, timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|topic| topic.error().is_none())
                .map(|topic| (topic.name().to_string(), partition_layout(topic)))
                .collect())
        })
        .await
    }
}

fn partition_layout(topic: &MetadataTopic) -> Vec<TopicPartitionDescription> {
    let mut partitions: Vec<_> = topic
        .partitions()
        .iter()
        .map(|p| TopicPartitionDescription {
            partition: p.id(),
            leader: (p.leader() >= 0).then_some(p.leader()),
            replicas: p.replicas().to_vec(),
            in_sync_replicas: p.isr().to_vec(),
        })
        .collect();
    partitions.sort_by_key(|p| p.partition);
    partitions
}

#[async_trait]
impl KafkaAdminClient for RdKafkaAdminClient {
    // One metadata request; topic configs are only fetched by `describe_topics`.
    async fn list_topics(&self, include_internal: bool) -> Result<Vec<TopicSummary>> {
        let topics = self.cluster_topics().await?;
        Ok(topics
            .into_iter()
            .map(|(name, partitions)| TopicSummary {
                internal: is_internal_topic(&name),
                partitions: partitions.len(),
                name,
            })
            .filter(|topic| include_internal || !topic.internal)
            .collect())
    }

    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicDescription>> {
        let mut topics = self.cluster_topics().await?;
        let mut descriptions = Vec::with_capacity(names.len());
        for name in names {
            let partitions = topics
                .remove(name)
                .ok_or_else(|| Error::TopicNotFound(name.clone()))?;
            descriptions.push(TopicDescription {
                name: name.clone(),
                internal: is_internal_topic(name),
                partitions,
                configs: BTreeMap::new(),
            });
        }

        let specifiers: Vec<ResourceSpecifier<'_>> = names
            .iter()
            .map(|name| ResourceSpecifier::Topic(name.as_str()))
            .collect();
        let options = AdminOptions::new().request_timeout(Some(self.request_timeout));
        let results = self.admin.describe_configs(&specifiers, &options).await?;

        for result in results {
            let resource = result
                .map_err(|code| Error::Admin(format!("Failed to describe topic configs: {code}")))?;
            let OwnedResourceSpecifier::Topic(topic) = &resource.specifier else {
                continue;
            };
            if let Some(description) = descriptions.iter_mut().find(|d| &d.name == topic) {
                description.configs = resource
                    .entries
                    .into_iter()
                    .filter_map(|entry| entry.value.map(|value| (entry.name, value)))
                    .collect();
            }
        }

        debug!("Described {} topic(s)", descriptions.len());
        Ok(descriptions)
    }

    async fn close(&self) -> Result<()> {
        // librdkafka releases the handle when the last reference drops.
        Ok(())
    }
}
