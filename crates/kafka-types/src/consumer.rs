//! Consumer session request and event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::ServiceError;
use crate::message::ConsumedMessage;

pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Where a session begins reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStartPosition {
    Earliest,
    #[default]
    Latest,
    /// Partition to offset
    SpecificOffsets(BTreeMap<i32, i64>),
    /// Milliseconds since epoch
    ///
    /// A partition with no record at or after the timestamp starts at its end offset.
    Timestamp(i64),
}

/// Parameters for one consumption session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSessionRequest {
    pub topic: String,
    /// Explicit partition set; all partitions of the topic when unset
    pub partitions: Option<BTreeSet<i32>>,
    pub start_position: ConsumerStartPosition,
    /// Consumer group id; a unique throwaway group is used when unset
    pub group_id: Option<String>,
    pub auto_commit: bool,
    pub max_poll_records: usize,
    pub poll_timeout: Duration,
    /// Extra consumer properties, applied after the connection properties
    pub properties: BTreeMap<String, String>,
}

impl ConsumerSessionRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partitions: None,
            start_position: ConsumerStartPosition::default(),
            group_id: None,
            auto_commit: false,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_partitions<I: IntoIterator<Item = i32>>(mut self, partitions: I) -> Self {
        self.partitions = Some(partitions.into_iter().collect());
        self
    }

    pub fn with_start_position(mut self, start_position: ConsumerStartPosition) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn with_max_poll_records(mut self, max_poll_records: usize) -> Self {
        self.max_poll_records = max_poll_records;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One unit pushed to the caller while a session runs.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    MessageReceived(ConsumedMessage),
    /// Emitted once per poll, after that poll's messages
    Stats {
        polled_records: usize,
        emitted_at: DateTime<Utc>,
    },
    Error(ServiceError),
}

impl ConsumerEvent {
    pub fn stats(polled_records: usize) -> Self {
        ConsumerEvent::Stats {
            polled_records,
            emitted_at: Utc::now(),
        }
    }
}

/// Lifecycle of a consumption session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Initializing,
    Polling,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Polling => "polling",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
