//! Connection settings for a Kafka cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid connection profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How to reach a cluster.
///
/// Passed by value into each service constructor. A TOML profile looks like:
///
/// ```toml
/// bootstrap_servers = ["localhost:9092"]
/// client_id = "light-kafka"
///
/// [properties]
/// "security.protocol" = "SASL_SSL"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub bootstrap_servers: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Free-form client properties, applied after everything else.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new<I, S>(bootstrap_servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bootstrap_servers: bootstrap_servers.into_iter().map(Into::into).collect(),
            client_id: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Comma-separated form used by `bootstrap.servers`.
    pub fn bootstrap_servers_string(&self) -> String {
        self.bootstrap_servers.join(",")
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ConnectionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .bootstrap_servers
            .iter()
            .all(|server| server.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "at least one bootstrap server is required".to_string(),
            ));
        }
        Ok(())
    }
}
