//! Command-line interface for light-kafka
//!
//! Every command prints JSON lines to stdout; logs go to stderr and are
//! controlled with `RUST_LOG`.
//!
//! # Usage Examples
//!
//! ```bash
//! # Topics
//! light-kafka --bootstrap-servers localhost:9092 topics list
//! light-kafka --profile cluster.toml topics describe orders
//!
//! # Produce a keyed record to a fixed partition
//! light-kafka produce --topic orders --partition 2 --key k1 --value v1
//!
//! # Consume from a point in time, committing the position on exit
//! light-kafka consume --topic orders --group-id viewer \
//!   --from timestamp:2024-01-01T00:00:00Z --commit-on-exit
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use kafka_types::{ConsumerEvent, ConsumerSessionRequest, ConsumerStartPosition, ProducerMessage};
use light_kafka::{
    event_line, parse_key_value, parse_start_position, ConnectionOpts, ConsumeProgress,
};
use light_kafka_client::{AdminService, ConsumerService, ProducerService};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "light-kafka")]
#[command(about = "Browse, produce to, and consume from Kafka topics")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect topics
    Topics {
        #[command(subcommand)]
        command: TopicsCommand,
    },

    /// Send a single record
    Produce {
        /// Target topic
        #[arg(long)]
        topic: String,

        /// Explicit partition (default: chosen by the partitioner)
        #[arg(long)]
        partition: Option<i32>,

        /// Record key
        #[arg(long)]
        key: Option<String>,

        /// Record value (omit to send a tombstone)
        #[arg(long)]
        value: Option<String>,

        /// Record header (format: name=value, repeatable)
        #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,

        /// Record timestamp in epoch milliseconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Stream records from a topic
    Consume {
        /// Topic to read
        #[arg(long)]
        topic: String,

        /// Partitions to read (default: all)
        #[arg(long, value_delimiter = ',')]
        partitions: Vec<i32>,

        /// Start position: earliest, latest, offsets:P=O,.. or timestamp:<RFC3339|millis>
        #[arg(long = "from", default_value = "latest", value_parser = parse_start_position)]
        start_position: ConsumerStartPosition,

        /// Consumer group id (default: a generated throwaway group)
        #[arg(long)]
        group_id: Option<String>,

        /// Let the client commit offsets periodically
        #[arg(long)]
        auto_commit: bool,

        /// Stop after this many records
        #[arg(long)]
        max_messages: Option<usize>,

        /// Maximum records returned by one poll
        #[arg(long, default_value = "500")]
        max_poll_records: usize,

        /// How long one poll waits for records, in milliseconds
        #[arg(long, default_value = "500")]
        poll_timeout_ms: u64,

        /// Commit the current offsets before stopping
        #[arg(long)]
        commit_on_exit: bool,

        /// Also print per-poll statistics
        #[arg(long)]
        show_stats: bool,
    },
}

#[derive(Subcommand)]
enum TopicsCommand {
    /// List topics with their partition counts
    List {
        /// Include internal topics such as __consumer_offsets
        #[arg(long)]
        include_internal: bool,
    },

    /// Show partitions, replicas, and configuration of one topic
    Describe {
        /// Topic name
        topic: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Logs on stderr, results on stdout
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let connection = cli.connection.connection_config()?;
    let timeout = cli.connection.operation_timeout();

    match cli.command {
        Commands::Topics { command } => {
            let admin = AdminService::new(connection, timeout);
            let result = run_topics(&admin, command).await;
            admin.close().await.context("Failed to close admin client")?;
            result?;
        }
        Commands::Produce {
            topic,
            partition,
            key,
            value,
            headers,
            timestamp,
        } => {
            let mut message = ProducerMessage::new(topic);
            message.partition = partition;
            message.key = key.map(String::into_bytes);
            message.value = value.map(String::into_bytes);
            message.timestamp = timestamp;
            for (name, value) in headers {
                message.headers.insert(name, Some(value.into_bytes()));
            }

            let producer = ProducerService::new(connection, timeout);
            let sent = producer.send(message).await.context("Failed to send message");
            producer.close().await.context("Failed to close producer client")?;
            print_line(&sent?)?;
        }
        Commands::Consume {
            topic,
            partitions,
            start_position,
            group_id,
            auto_commit,
            max_messages,
            max_poll_records,
            poll_timeout_ms,
            commit_on_exit,
            show_stats,
        } => {
            let mut request = ConsumerSessionRequest::new(topic)
                .with_start_position(start_position)
                .with_auto_commit(auto_commit)
                .with_max_poll_records(max_poll_records)
                .with_poll_timeout(Duration::from_millis(poll_timeout_ms));
            if !partitions.is_empty() {
                request = request.with_partitions(partitions);
            }
            if let Some(group_id) = group_id {
                request = request.with_group_id(group_id);
            }

            let consumer = ConsumerService::new(connection, timeout);
            let options = ConsumeOptions {
                max_messages,
                commit_on_exit,
                show_stats,
            };
            run_consume(&consumer, request, options).await?;
        }
    }

    Ok(())
}

async fn run_topics(admin: &AdminService, command: TopicsCommand) -> anyhow::Result<()> {
    match command {
        TopicsCommand::List { include_internal } => {
            let topics = admin
                .list_topics(include_internal)
                .await
                .context("Failed to list topics")?;
            for topic in &topics {
                print_line(topic)?;
            }
        }
        TopicsCommand::Describe { topic } => {
            let description = admin
                .describe_topic(&topic)
                .await
                .with_context(|| format!("Failed to describe topic '{topic}'"))?;
            print_line(&description)?;
        }
    }
    Ok(())
}

struct ConsumeOptions {
    max_messages: Option<usize>,
    commit_on_exit: bool,
    show_stats: bool,
}

async fn run_consume(
    consumer: &ConsumerService,
    request: ConsumerSessionRequest,
    options: ConsumeOptions,
) -> anyhow::Result<()> {
    info!("Consuming from {}", request.topic);
    let mut events = consumer.start_session(request);
    let mut progress = ConsumeProgress::default();
    let mut ended = false;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, stopping consumer session");
                break;
            }
            event = events.next() => {
                let Some(event) = event else {
                    ended = true;
                    break;
                };
                progress.observe(&event);
                if matches!(event, ConsumerEvent::Stats { .. }) && !options.show_stats {
                    continue;
                }
                print_line(&event_line(&event))?;
                if options.max_messages.is_some_and(|max| progress.received() >= max) {
                    break;
                }
            }
        }
    }

    // Nothing to commit for a session that ended by itself
    if ended {
        consumer.stop().await.context("Failed to stop consumer session")?;
        return Err(progress.ended_error());
    }

    if options.commit_on_exit {
        consumer.commit().await.context("Failed to commit offsets")?;
    }
    consumer.stop().await.context("Failed to stop consumer session")?;
    info!("Consumed {} record(s)", progress.received());
    Ok(())
}

fn print_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value).context("Failed to serialize output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("Failed to write output")?;
    Ok(())
}
