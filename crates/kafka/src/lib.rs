//! Session layer between a Kafka desktop client and the cluster.
//!
//! Three services wrap the broker, each bounding every call with the same
//! timeout policy and reporting failures as [`kafka_types::ServiceError`]:
//!
//! - Admin: list and describe topics
//! - Producer: send single records
//! - Consumer: streaming sessions with pause, resume, commit, and stop
//!
//! The services talk to the broker through the capability traits in
//! [`ports`]; [`client`] implements them on top of rdkafka.

/// Topic listing and description
pub mod admin;

/// rdkafka implementations of the broker capabilities
pub mod client;

/// librdkafka property construction and operation defaults
pub mod config;

/// Consumer sessions and their event streams
///
/// Only one session is active per service. Starting another supersedes it.
pub mod consumer;
pub mod error;
pub mod ports;
pub mod producer;
pub mod runner;

mod lazy;

#[cfg(test)]
mod testing;

pub use admin::AdminService;
pub use client::RdKafkaClientFactory;
pub use config::DEFAULT_OPERATION_TIMEOUT;
pub use consumer::{ConsumerEventStream, ConsumerService};
pub use error::{Error, Result};
pub use producer::ProducerService;
pub use runner::run_with_timeout;
