use thiserror::Error;

/// Failures raised by the broker capabilities.
///
/// Services never return this type directly: the operation runner wraps it
/// into `ServiceError::OperationFailed` together with the operation name.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Consumer partitions are not assigned")]
    PartitionsNotAssigned,

    #[error("Admin error: {0}")]
    Admin(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Blocking client call failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
