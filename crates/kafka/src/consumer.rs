//! Streaming consumer sessions.
//!
//! A [`ConsumerService`] owns at most one active session at a time. Each call
//! to [`ConsumerService::start_session`] returns an independent, lazy
//! [`ConsumerEventStream`]; the first poll of that stream spawns the session
//! task, which:
//!
//! 1. creates a consumer client for the request,
//! 2. registers itself as the active session, clearing the running flag of the
//!    previous session and closing its client before going any further,
//! 3. resolves and assigns partitions and seeks to the start position,
//! 4. polls until stopped, superseded, or the stream is dropped.
//!
//! Pause, resume, commit, and stop act on whichever session is registered.
//! The polling loop only reads the session's atomic flags, never the registry lock.
//! However the task exits, it deregisters its session and closes the client,
//! and the client is closed exactly once.

use futures::Stream;
use kafka_types::{
    ConnectionConfig, ConsumerEvent, ConsumerSessionRequest, ConsumerStartPosition,
    ServiceError, ServiceResult, SessionState,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::client::RdKafkaClientFactory;
use crate::error::Error;
use crate::ports::{KafkaConsumerClient, KafkaConsumerClientFactory};
use crate::runner::run_with_timeout;

const MIN_IDLE_WAIT: Duration = Duration::from_millis(1);

/// Consumption sessions against one cluster.
///
/// Cloning is cheap and clones share the same active session.
#[derive(Clone)]
pub struct ConsumerService {
    shared: Arc<Shared>,
}

struct Shared {
    connection: ConnectionConfig,
    factory: Arc<dyn KafkaConsumerClientFactory>,
    operation_timeout: Duration,
    active: Mutex<Option<Arc<ActiveSession>>>,
    next_session_id: AtomicU64,
}

struct ActiveSession {
    id: u64,
    topic: String,
    client: Arc<dyn KafkaConsumerClient>,
    running: AtomicBool,
    paused: AtomicBool,
    polling: AtomicBool,
    closed: AtomicBool,
    /// Fixed once assigned
    partitions: OnceLock<BTreeSet<i32>>,
}

impl ActiveSession {
    fn new(id: u64, topic: String, client: Arc<dyn KafkaConsumerClient>) -> Self {
        Self {
            id,
            topic,
            client,
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            partitions: OnceLock::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn state(&self) -> SessionState {
        if !self.is_running() {
            SessionState::Stopped
        } else if !self.polling.load(Ordering::Acquire) {
            SessionState::Initializing
        } else if self.is_paused() {
            SessionState::Paused
        } else {
            SessionState::Polling
        }
    }

    /// Mark not running, then release the client if nobody has yet.
    async fn shutdown(&self, timeout: Duration) -> ServiceResult<()> {
        self.running.store(false, Ordering::Release);
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        debug!("Closing consumer client of session {} ({})", self.id, self.topic);
        run_with_timeout("close consumer client", timeout, self.client.close()).await
    }
}

impl ConsumerService {
    /// Consumer service backed by rdkafka.
    pub fn new(connection: ConnectionConfig, operation_timeout: Duration) -> Self {
        Self::with_factory(
            connection,
            RdKafkaClientFactory::new(operation_timeout),
            operation_timeout,
        )
    }

    pub fn with_factory<F>(connection: ConnectionConfig, factory: F, operation_timeout: Duration) -> Self
    where
        F: KafkaConsumerClientFactory + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                connection,
                factory: Arc::new(factory),
                operation_timeout,
                active: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Events of a new session for `request`.
    ///
    /// Nothing happens until the stream is first polled. Starting a session
    /// supersedes the one currently active. Dropping the stream ends the
    /// session and releases its client.
    pub fn start_session(&self, request: ConsumerSessionRequest) -> ConsumerEventStream {
        ConsumerEventStream {
            pending: Some((Arc::clone(&self.shared), request)),
            events: None,
        }
    }

    /// Suspend fetching for the active session. No-op without one.
    pub async fn pause(&self) -> ServiceResult<()> {
        let Some(session) = self.shared.current().await else {
            return Ok(());
        };
        session.paused.store(true, Ordering::Release);
        info!("Pausing consumer session {}", session.id);
        match session.partitions.get() {
            Some(partitions) => {
                run_with_timeout(
                    "pause consumer",
                    self.shared.operation_timeout,
                    session.client.pause(partitions),
                )
                .await
            }
            None => Ok(()),
        }
    }

    /// Continue fetching for the active session. No-op without one.
    pub async fn resume(&self) -> ServiceResult<()> {
        let Some(session) = self.shared.current().await else {
            return Ok(());
        };
        session.paused.store(false, Ordering::Release);
        info!("Resuming consumer session {}", session.id);
        match session.partitions.get() {
            Some(partitions) => {
                run_with_timeout(
                    "resume consumer",
                    self.shared.operation_timeout,
                    session.client.resume(partitions),
                )
                .await
            }
            None => Ok(()),
        }
    }

    /// Commit the current offsets of the active session.
    pub async fn commit(&self) -> ServiceResult<()> {
        let Some(session) = self.shared.current().await else {
            return Err(ServiceError::failed(
                "commit offsets",
                "No active consumer session",
            ));
        };
        info!("Committing offsets of consumer session {}", session.id);
        run_with_timeout(
            "commit offsets",
            self.shared.operation_timeout,
            session.client.commit(),
        )
        .await
    }

    /// Detach the active session, mark it not running, and close its client.
    pub async fn stop(&self) -> ServiceResult<()> {
        let session = self.shared.active.lock().await.take();
        match session {
            Some(session) => {
                info!("Stopping consumer session {}", session.id);
                session.shutdown(self.shared.operation_timeout).await
            }
            None => Ok(()),
        }
    }

    /// Final teardown; same as [`ConsumerService::stop`].
    pub async fn close(&self) -> ServiceResult<()> {
        self.stop().await
    }

    /// State of the active session, `Idle` when there is none.
    pub async fn session_state(&self) -> SessionState {
        match self.shared.current().await {
            Some(session) => session.state(),
            None => SessionState::Idle,
        }
    }
}

impl Shared {
    async fn current(&self) -> Option<Arc<ActiveSession>> {
        self.active.lock().await.clone()
    }

    /// Register `session` as active, then shut the previous one down.
    async fn activate(&self, session: Arc<ActiveSession>) {
        let previous = self.active.lock().await.replace(Arc::clone(&session));
        if let Some(previous) = previous {
            info!(
                "Consumer session {} supersedes session {}",
                session.id, previous.id
            );
            if let Err(err) = previous.shutdown(self.operation_timeout).await {
                warn!("Failed to close superseded session {}: {err}", previous.id);
            }
        }
    }

    /// Deregister `session` if it is still the active one, then shut it down.
    async fn release(&self, session: &Arc<ActiveSession>) {
        {
            let mut active = self.active.lock().await;
            if active
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                *active = None;
            }
        }
        if let Err(err) = session.shutdown(self.operation_timeout).await {
            warn!("Failed to close consumer session {}: {err}", session.id);
        }
        info!("Consumer session {} ended", session.id);
    }
}

/// Lazily started stream of [`ConsumerEvent`]s for one session.
pub struct ConsumerEventStream {
    pending: Option<(Arc<Shared>, ConsumerSessionRequest)>,
    events: Option<ReceiverStream<ConsumerEvent>>,
}

impl Stream for ConsumerEventStream {
    type Item = ConsumerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some((shared, request)) = this.pending.take() {
            // Room for one full batch plus its stats event.
            let (tx, rx) = mpsc::channel(request.max_poll_records.max(1) + 1);
            tokio::spawn(run_session(shared, request, tx));
            this.events = Some(ReceiverStream::new(rx));
        }
        match this.events.as_mut() {
            Some(events) => Pin::new(events).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

type EventSender = mpsc::Sender<ConsumerEvent>;

/// Session task entry point.
async fn run_session(shared: Arc<Shared>, request: ConsumerSessionRequest, events: EventSender) {
    let client = match shared.factory.create(&shared.connection, &request) {
        Ok(client) => client,
        Err(err) => {
            error!("Failed to create consumer client for {}: {err}", request.topic);
            let _ = events
                .send(ConsumerEvent::Error(ServiceError::from_cause(
                    "create consumer client",
                    err,
                )))
                .await;
            return;
        }
    };

    let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
    let session = Arc::new(ActiveSession::new(id, request.topic.clone(), client));
    info!("Starting consumer session {id} for topic {}", request.topic);
    shared.activate(Arc::clone(&session)).await;

    drive(&shared, &session, &request, &events).await;

    shared.release(&session).await;
}

/// Initialize, then poll until the session stops or the stream is dropped.
async fn drive(
    shared: &Shared,
    session: &ActiveSession,
    request: &ConsumerSessionRequest,
    events: &EventSender,
) {
    let timeout = shared.operation_timeout;

    let initialized = match until_closed(events, initialize(session, request, timeout)).await {
        Some(result) => result,
        None => return,
    };
    if let Err(err) = initialized {
        error!("Consumer session {} failed to initialize: {err}", session.id);
        let _ = events.send(ConsumerEvent::Error(err)).await;
        return;
    }

    session.polling.store(true, Ordering::Release);
    let poll_timeout = bounded_poll_timeout(request.poll_timeout, timeout);
    if poll_timeout < request.poll_timeout {
        warn!(
            "Consumer session {}: poll timeout {:?} lowered to {poll_timeout:?} to fit the {timeout:?} operation timeout",
            session.id, request.poll_timeout
        );
    }
    let idle = poll_timeout.max(MIN_IDLE_WAIT);

    while session.is_running() {
        if session.is_paused() {
            if until_closed(events, tokio::time::sleep(idle)).await.is_none() {
                return;
            }
            continue;
        }

        let polled = until_closed(
            events,
            run_with_timeout(
                "poll messages",
                timeout,
                session.client.poll(poll_timeout),
            ),
        )
        .await;
        let Some(polled) = polled else {
            return;
        };

        if !session.is_running() {
            break;
        }

        match polled {
            Ok(messages) => {
                let polled_records = messages.len();
                for message in messages {
                    if events.send(ConsumerEvent::MessageReceived(message)).await.is_err() {
                        return;
                    }
                }
                if events.send(ConsumerEvent::stats(polled_records)).await.is_err() {
                    return;
                }
                if polled_records == 0
                    && until_closed(events, tokio::time::sleep(idle)).await.is_none()
                {
                    return;
                }
            }
            Err(err) => {
                warn!("Consumer session {} poll failed: {err}", session.id);
                if events.send(ConsumerEvent::Error(err)).await.is_err() {
                    return;
                }
            }
        }
    }
    debug!("Consumer session {} left its polling loop", session.id);
}

/// A poll that outlives the operation timeout is abandoned together with the
/// records it already took from the client, so each poll gets at most half.
fn bounded_poll_timeout(requested: Duration, operation_timeout: Duration) -> Duration {
    requested.min(operation_timeout / 2)
}

/// Resolve and assign partitions, then apply the start position.
async fn initialize(
    session: &ActiveSession,
    request: &ConsumerSessionRequest,
    timeout: Duration,
) -> ServiceResult<()> {
    let client = &session.client;

    let partitions = match &request.partitions {
        Some(partitions) => partitions.clone(),
        None => {
            run_with_timeout(
                "resolve topic partitions",
                timeout,
                client.partitions_for(&request.topic),
            )
            .await?
        }
    };
    if partitions.is_empty() {
        return Err(ServiceError::failed(
            "initialize consumer session",
            format!("No partitions available for topic {}", request.topic),
        ));
    }

    let partitions = session.partitions.get_or_init(|| partitions);
    run_with_timeout(
        "assign partitions",
        timeout,
        client.assign(&request.topic, partitions),
    )
    .await?;
    debug!(
        "Consumer session {} assigned {} partition(s) of {}",
        session.id,
        partitions.len(),
        request.topic
    );

    match &request.start_position {
        ConsumerStartPosition::Earliest => {
            run_with_timeout(
                "seek to earliest offsets",
                timeout,
                client.seek_to_beginning(partitions),
            )
            .await
        }
        ConsumerStartPosition::Latest => {
            run_with_timeout("seek to latest offsets", timeout, client.seek_to_end(partitions))
                .await
        }
        ConsumerStartPosition::SpecificOffsets(offsets) => {
            if let Some(partition) = offsets.keys().find(|p| !partitions.contains(*p)) {
                return Err(ServiceError::failed(
                    "seek to specific offsets",
                    format!("Partition {partition} is not assigned to this session"),
                ));
            }
            run_with_timeout("seek to specific offsets", timeout, async {
                for (partition, offset) in offsets {
                    client.seek(*partition, *offset).await?;
                }
                Ok::<_, Error>(())
            })
            .await
        }
        ConsumerStartPosition::Timestamp(timestamp) => {
            run_with_timeout(
                "seek to timestamp",
                timeout,
                seek_to_timestamp(client.as_ref(), *timestamp, partitions),
            )
            .await
        }
    }
}

/// Seek every partition to its first offset at or after `timestamp`.
///
/// Partitions without such a record are moved to their end offset.
async fn seek_to_timestamp(
    client: &dyn KafkaConsumerClient,
    timestamp: i64,
    partitions: &BTreeSet<i32>,
) -> Result<(), Error> {
    let lookup: BTreeMap<i32, i64> = partitions.iter().map(|p| (*p, timestamp)).collect();
    let found = client.offsets_for_times(&lookup).await?;

    let missing: BTreeSet<i32> = partitions
        .iter()
        .filter(|&&p| found.get(&p).copied().flatten().is_none())
        .copied()
        .collect();
    let end_offsets = if missing.is_empty() {
        BTreeMap::new()
    } else {
        debug!("No records at or after {timestamp} in partitions {missing:?}, using end offsets");
        client.end_offsets(&missing).await?
    };

    for partition in partitions {
        let offset = match found.get(partition).copied().flatten() {
            Some(offset) => offset,
            None => end_offsets.get(partition).copied().unwrap_or(0),
        };
        client.seek(*partition, offset).await?;
    }
    Ok(())
}

/// Run `work` unless the event receiver goes away first.
async fn until_closed<F: Future>(events: &EventSender, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = events.closed() => None,
        output = work => Some(output),
    }
}
