//! Translation of connection settings and session requests into librdkafka properties.

use kafka_types::{ConnectionConfig, ConsumerSessionRequest};
use rdkafka::config::ClientConfig;
use std::time::Duration;

/// Default bound applied to every service operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of the throwaway group id used when a session names no group.
pub const GENERATED_GROUP_PREFIX: &str = "light-kafka-viewer";

/// Base client properties shared by admin, producer, and consumer clients.
///
/// Free-form connection properties are applied last so they can override anything.
pub fn client_config(connection: &ConnectionConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", connection.bootstrap_servers_string());
    if let Some(client_id) = &connection.client_id {
        config.set("client.id", client_id);
    }
    for (key, value) in &connection.properties {
        config.set(key, value);
    }
    config
}

/// Consumer properties for one session.
///
/// Precedence, lowest first: session defaults, connection properties, request properties.
pub fn consumer_client_config(
    connection: &ConnectionConfig,
    request: &ConsumerSessionRequest,
) -> ClientConfig {
    let group_id = request
        .group_id
        .clone()
        .unwrap_or_else(generated_group_id);

    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", connection.bootstrap_servers_string())
        .set("group.id", group_id)
        .set("enable.auto.commit", request.auto_commit.to_string())
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "latest");
    if let Some(client_id) = &connection.client_id {
        config.set("client.id", client_id);
    }
    for (key, value) in connection.properties.iter().chain(&request.properties) {
        config.set(key, value);
    }
    config
}

pub fn generated_group_id() -> String {
    format!("{GENERATED_GROUP_PREFIX}-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_properties_override_defaults() {
        let connection = ConnectionConfig::new(["a:9092", "b:9092"])
            .with_client_id("viewer")
            .with_property("client.id", "overridden")
            .with_property("security.protocol", "SSL");

        let config = client_config(&connection);

        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("client.id"), Some("overridden"));
        assert_eq!(config.get("security.protocol"), Some("SSL"));
    }

    #[test]
    fn test_consumer_config_uses_request_group_and_commit_mode() {
        let connection = ConnectionConfig::new(["localhost:9092"]);
        let request = ConsumerSessionRequest::new("orders")
            .with_group_id("orders-viewer")
            .with_auto_commit(true);

        let config = consumer_client_config(&connection, &request);

        assert_eq!(config.get("group.id"), Some("orders-viewer"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("enable.partition.eof"), Some("false"));
    }

    #[test]
    fn test_consumer_config_generates_unique_group_when_unset() {
        let connection = ConnectionConfig::new(["localhost:9092"]);
        let request = ConsumerSessionRequest::new("orders");

        let first = consumer_client_config(&connection, &request);
        let second = consumer_client_config(&connection, &request);

        let first_group = first.get("group.id").unwrap();
        assert!(first_group.starts_with("light-kafka-viewer-"));
        assert_ne!(Some(first_group), second.get("group.id"));
    }

    #[test]
    fn test_request_properties_win_over_connection_properties() {
        let connection =
            ConnectionConfig::new(["localhost:9092"]).with_property("auto.offset.reset", "error");
        let request =
            ConsumerSessionRequest::new("orders").with_property("auto.offset.reset", "earliest");

        let config = consumer_client_config(&connection, &request);
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));

        let config = consumer_client_config(&connection, &ConsumerSessionRequest::new("orders"));
        assert_eq!(config.get("auto.offset.reset"), Some("error"));
    }
}
