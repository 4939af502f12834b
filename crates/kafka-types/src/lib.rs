//! Data model for the light-kafka client services.
//!
//! This crate holds the plain types that flow between the application layer
//! and the client session layer (`light-kafka-client`). It has no broker
//! dependency, so front ends can build requests and render results without
//! linking librdkafka.
//!
//! # Modules
//!
//! - [`config`] - How to reach a cluster, optionally loaded from a TOML profile
//! - [`topic`] - Topic listings and full topic metadata
//! - [`message`] - Outbound and consumed records
//! - [`consumer`] - Session requests, start positions, and session events
//! - [`error`] - `ServiceError` and the `ServiceResult` alias every service returns

pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod topic;

pub use config::{ConfigError, ConnectionConfig};
pub use consumer::{
    ConsumerEvent, ConsumerSessionRequest, ConsumerStartPosition, SessionState,
    DEFAULT_MAX_POLL_RECORDS, DEFAULT_POLL_TIMEOUT,
};
pub use error::{ServiceError, ServiceResult, UNEXPECTED_FAILURE_REASON};
pub use message::{ConsumedMessage, Headers, ProducerMessage, ProducerSendResult};
pub use topic::{TopicDescription, TopicPartitionDescription, TopicSummary};
