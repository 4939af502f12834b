//! light-kafka command-line support
//!
//! Connection flags, argument parsers, and the JSON-lines rendering used by
//! the `light-kafka` binary. The binary itself only wires these to the
//! services of `light-kafka-client`.
//!
//! # CLI Usage
//!
//! ```bash
//! # List topics, including internal ones
//! light-kafka --bootstrap-servers localhost:9092 topics list --include-internal
//!
//! # Send one record with a header
//! light-kafka produce --topic orders --key k1 --value '{"id":1}' --header trace=abc
//!
//! # Read ten records from the start of partitions 0 and 1
//! light-kafka consume --topic orders --partitions 0,1 --from earliest --max-messages 10
//! ```

use anyhow::{anyhow, bail, Context};
use base64::Engine;
use clap::Args;
use kafka_types::{
    ConnectionConfig, ConsumedMessage, ConsumerEvent, ConsumerStartPosition, ServiceError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Clone, Debug)]
pub struct ConnectionOpts {
    /// Kafka bootstrap servers (comma separated)
    #[arg(
        long,
        env = "LIGHT_KAFKA_BOOTSTRAP_SERVERS",
        value_delimiter = ',',
        global = true
    )]
    pub bootstrap_servers: Vec<String>,

    /// Client id reported to the brokers
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Extra librdkafka property (format: key=value, repeatable)
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_key_value, global = true)]
    pub properties: Vec<(String, String)>,

    /// TOML connection profile; flags given on the command line take precedence
    #[arg(long, value_name = "PATH", global = true)]
    pub profile: Option<PathBuf>,

    /// Timeout applied to every broker operation, in milliseconds
    #[arg(long, default_value = "10000", global = true)]
    pub timeout_ms: u64,
}

impl ConnectionOpts {
    /// Resolve the profile (if any) and the command-line overrides into one config.
    pub fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.profile {
            Some(path) => ConnectionConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load connection profile from {path:?}"))?,
            None => ConnectionConfig::new(Vec::<String>::new()),
        };

        if !self.bootstrap_servers.is_empty() {
            config.bootstrap_servers = self
                .bootstrap_servers
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(client_id) = &self.client_id {
            config.client_id = Some(client_id.clone());
        }
        for (key, value) in &self.properties {
            config.properties.insert(key.clone(), value.clone());
        }

        config
            .validate()
            .context("Invalid connection settings (set --bootstrap-servers or --profile)")?;
        Ok(config)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Parse a `key=value` pair. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Parse a consumer start position.
///
/// Accepted forms:
/// - `earliest`, `latest`
/// - `offsets:0=10,1=20` (partition=offset pairs)
/// - `timestamp:2024-01-01T00:00:00Z` or `timestamp:1704067200000` (epoch millis)
pub fn parse_start_position(s: &str) -> anyhow::Result<ConsumerStartPosition> {
    let s = s.trim();
    match s {
        "earliest" => return Ok(ConsumerStartPosition::Earliest),
        "latest" => return Ok(ConsumerStartPosition::Latest),
        _ => {}
    }

    if let Some(offsets) = s.strip_prefix("offsets:") {
        let mut parsed = BTreeMap::new();
        for pair in offsets.split(',').filter(|p| !p.trim().is_empty()) {
            let (partition, offset) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected partition=offset, got '{pair}'"))?;
            let partition: i32 = partition
                .trim()
                .parse()
                .with_context(|| format!("Invalid partition in '{pair}'"))?;
            let offset: i64 = offset
                .trim()
                .parse()
                .with_context(|| format!("Invalid offset in '{pair}'"))?;
            if partition < 0 || offset < 0 {
                bail!("Partition and offset must not be negative: '{pair}'");
            }
            parsed.insert(partition, offset);
        }
        if parsed.is_empty() {
            bail!("No partition offsets given in '{s}'");
        }
        return Ok(ConsumerStartPosition::SpecificOffsets(parsed));
    }

    if let Some(timestamp) = s.strip_prefix("timestamp:") {
        let timestamp = timestamp.trim();
        let millis = match timestamp.parse::<i64>() {
            Ok(millis) => millis,
            Err(_) => chrono::DateTime::parse_from_rfc3339(timestamp)
                .with_context(|| format!("Invalid timestamp '{timestamp}'"))?
                .timestamp_millis(),
        };
        return Ok(ConsumerStartPosition::Timestamp(millis));
    }

    bail!("Unknown start position '{s}' (expected earliest, latest, offsets:P=O,.. or timestamp:T)")
}

/// Record bytes as they appear in output: text when valid UTF-8, base64 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum RenderedBytes {
    Utf8(String),
    Base64(String),
}

impl RenderedBytes {
    pub fn new(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => RenderedBytes::Utf8(text.to_string()),
            Err(_) => RenderedBytes::Base64(base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageLine<'a> {
    topic: &'a str,
    partition: i32,
    offset: i64,
    timestamp: Option<i64>,
    key: Option<RenderedBytes>,
    value: Option<RenderedBytes>,
    headers: BTreeMap<&'a str, Option<RenderedBytes>>,
}

impl<'a> From<&'a ConsumedMessage> for MessageLine<'a> {
    fn from(message: &'a ConsumedMessage) -> Self {
        Self {
            topic: &message.topic,
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            key: message.key.as_deref().map(RenderedBytes::new),
            value: message.value.as_deref().map(RenderedBytes::new),
            headers: message
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_deref().map(RenderedBytes::new)))
                .collect(),
        }
    }
}

/// One JSON object per consumer event.
pub fn event_line(event: &ConsumerEvent) -> serde_json::Value {
    match event {
        ConsumerEvent::MessageReceived(message) => serde_json::json!({
            "type": "message",
            "message": MessageLine::from(message),
        }),
        ConsumerEvent::Stats {
            polled_records,
            emitted_at,
        } => serde_json::json!({
            "type": "stats",
            "polled_records": polled_records,
            "emitted_at": emitted_at.to_rfc3339(),
        }),
        ConsumerEvent::Error(err) => serde_json::json!({
            "type": "error",
            "operation": err.operation(),
            "timeout": err.is_timeout(),
            "message": err.to_string(),
        }),
    }
}

/// Tally of a running `consume` command.
///
/// A session stream only ends by itself when the session could not start or
/// was cut short, and the last event it delivered says why.
#[derive(Debug, Default)]
pub struct ConsumeProgress {
    received: usize,
    last_error: Option<ServiceError>,
}

impl ConsumeProgress {
    pub fn observe(&mut self, event: &ConsumerEvent) {
        match event {
            ConsumerEvent::MessageReceived(_) => {
                self.received += 1;
                self.last_error = None;
            }
            ConsumerEvent::Stats { .. } => self.last_error = None,
            ConsumerEvent::Error(err) => self.last_error = Some(err.clone()),
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// The failure to report when the stream ended without being stopped.
    pub fn ended_error(&self) -> anyhow::Error {
        match &self.last_error {
            Some(err) => anyhow::Error::new(err.clone()).context("Consumer session ended"),
            None => anyhow!("Consumer session ended unexpectedly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kafka_types::ServiceError;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        connection: ConnectionOpts,
    }

    #[test]
    fn test_parse_start_position_keywords() {
        assert_eq!(
            parse_start_position("earliest").unwrap(),
            ConsumerStartPosition::Earliest
        );
        assert_eq!(
            parse_start_position(" latest ").unwrap(),
            ConsumerStartPosition::Latest
        );
    }

    #[test]
    fn test_parse_start_position_offsets() {
        assert_eq!(
            parse_start_position("offsets:0=10, 1=20").unwrap(),
            ConsumerStartPosition::SpecificOffsets(BTreeMap::from([(0, 10), (1, 20)]))
        );
        assert!(parse_start_position("offsets:").is_err());
        assert!(parse_start_position("offsets:0").is_err());
        assert!(parse_start_position("offsets:a=1").is_err());
        assert!(parse_start_position("offsets:0=-5").is_err());
    }

    #[test]
    fn test_parse_start_position_timestamps() {
        assert_eq!(
            parse_start_position("timestamp:1704067200000").unwrap(),
            ConsumerStartPosition::Timestamp(1_704_067_200_000)
        );
        assert_eq!(
            parse_start_position("timestamp:2024-01-01T00:00:00Z").unwrap(),
            ConsumerStartPosition::Timestamp(1_704_067_200_000)
        );
        assert_eq!(
            parse_start_position("timestamp:2024-01-01T01:00:00+01:00").unwrap(),
            ConsumerStartPosition::Timestamp(1_704_067_200_000)
        );
        assert!(parse_start_position("timestamp:yesterday").is_err());
    }

    #[test]
    fn test_parse_start_position_rejects_unknown() {
        let err = parse_start_position("beginning").unwrap_err();
        assert!(err.to_string().contains("Unknown start position"));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("sasl.password=a=b").unwrap(),
            ("sasl.password".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_connection_config_from_flags() {
        let cli = TestCli::try_parse_from([
            "light-kafka",
            "--bootstrap-servers",
            "a:9092,b:9092",
            "--client-id",
            "viewer",
            "--property",
            "security.protocol=SSL",
            "--timeout-ms",
            "2500",
        ])
        .unwrap();

        let config = cli.connection.connection_config().unwrap();

        assert_eq!(config.bootstrap_servers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.client_id.as_deref(), Some("viewer"));
        assert_eq!(
            config.properties.get("security.protocol").map(String::as_str),
            Some("SSL")
        );
        assert_eq!(cli.connection.operation_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_flags_override_profile() {
        let mut profile = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            profile,
            r#"
bootstrap_servers = ["profile:9092"]
client_id = "from-profile"

[properties]
"security.protocol" = "SASL_SSL"
"sasl.mechanism" = "PLAIN"
"#
        )
        .unwrap();

        let path = profile.path().to_string_lossy().to_string();
        let cli = TestCli::try_parse_from([
            "light-kafka",
            "--profile",
            &path,
            "--property",
            "sasl.mechanism=SCRAM-SHA-512",
        ])
        .unwrap();

        let config = cli.connection.connection_config().unwrap();

        assert_eq!(config.bootstrap_servers, vec!["profile:9092"]);
        assert_eq!(config.client_id.as_deref(), Some("from-profile"));
        assert_eq!(
            config.properties.get("security.protocol").map(String::as_str),
            Some("SASL_SSL")
        );
        assert_eq!(
            config.properties.get("sasl.mechanism").map(String::as_str),
            Some("SCRAM-SHA-512")
        );
    }

    #[test]
    fn test_connection_config_requires_servers() {
        let opts = ConnectionOpts {
            bootstrap_servers: Vec::new(),
            client_id: None,
            properties: Vec::new(),
            profile: None,
            timeout_ms: 10_000,
        };

        assert!(opts.connection_config().is_err());
    }

    #[test]
    fn test_rendered_bytes_falls_back_to_base64() {
        assert_eq!(
            RenderedBytes::new(b"hello"),
            RenderedBytes::Utf8("hello".to_string())
        );
        assert_eq!(
            RenderedBytes::new(&[0xff, 0x00, 0x01]),
            RenderedBytes::Base64("/wAB".to_string())
        );
    }

    #[test]
    fn test_message_event_line() {
        let message = ConsumedMessage {
            topic: "orders".to_string(),
            partition: 1,
            offset: 42,
            timestamp: Some(1_700_000_000_000),
            key: Some(vec![0xff]),
            value: Some(b"{\"id\":1}".to_vec()),
            headers: BTreeMap::from([("trace".to_string(), None)]),
        };

        let line = event_line(&ConsumerEvent::MessageReceived(message));

        assert_eq!(line["type"], "message");
        assert_eq!(line["message"]["offset"], 42);
        assert_eq!(line["message"]["key"]["encoding"], "base64");
        assert_eq!(line["message"]["key"]["data"], "/w==");
        assert_eq!(line["message"]["value"]["encoding"], "utf8");
        assert_eq!(line["message"]["value"]["data"], "{\"id\":1}");
        assert!(line["message"]["headers"]["trace"].is_null());
    }

    #[test]
    fn test_error_event_line() {
        let err = ServiceError::timeout("poll messages", Duration::from_secs(10));

        let line = event_line(&ConsumerEvent::Error(err));

        assert_eq!(line["type"], "error");
        assert_eq!(line["operation"], "poll messages");
        assert_eq!(line["timeout"], true);
    }

    #[test]
    fn test_consume_progress_counts_messages() {
        let mut progress = ConsumeProgress::default();
        let message = ConsumedMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 1,
            timestamp: None,
            key: None,
            value: None,
            headers: BTreeMap::new(),
        };

        progress.observe(&ConsumerEvent::MessageReceived(message.clone()));
        progress.observe(&ConsumerEvent::stats(1));
        progress.observe(&ConsumerEvent::MessageReceived(message));

        assert_eq!(progress.received(), 2);
    }

    #[test]
    fn test_stream_ended_by_init_failure_reports_cause() {
        let mut progress = ConsumeProgress::default();
        progress.observe(&ConsumerEvent::Error(ServiceError::failed(
            "resolve topic partitions",
            "Topic not found: orders",
        )));

        let err = format!("{:#}", progress.ended_error());

        assert!(err.starts_with("Consumer session ended: "), "{err}");
        assert!(err.contains("resolve topic partitions"), "{err}");
    }

    #[test]
    fn test_recovered_error_is_not_reported_at_end() {
        let mut progress = ConsumeProgress::default();
        progress.observe(&ConsumerEvent::Error(ServiceError::timeout(
            "poll messages",
            Duration::from_secs(10),
        )));
        progress.observe(&ConsumerEvent::stats(0));

        assert_eq!(
            progress.ended_error().to_string(),
            "Consumer session ended unexpectedly"
        );
    }
}
