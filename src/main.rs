//! CLI for TetherMQ
//!
//! Subcommands:
//! - `demo`: publish tasks through an embedded broker and consume them,
//!   optionally forcing a broker outage halfway through
//! - `config`: print the effective configuration

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use tethermq::broker::Connection;
use tethermq::broker::memory::{MemoryBroker, MemoryChannel, MemoryConnection};
use tethermq::config::{BrokerSettings, Settings, load_config};
use tethermq::utils::logging;
use tethermq::{BackoffPolicy, Consumer, HandlerError, MqError, Publisher, Result, Topology, telemetry};

#[derive(Parser)]
#[command(name = "tethermq")]
enum Command {
    /// Run a producer and a consumer against an embedded broker
    Demo {
        /// Number of tasks to publish
        #[arg(long, default_value_t = 10)]
        messages: u32,
        /// Drop every broker connection halfway through
        #[arg(long)]
        chaos: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Task {
    id: u32,
    payload: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info", None);
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let provider = telemetry::init_tracer_provider(&settings.app.name);
    logging::init(&settings.app.log_level, Some(&provider));

    let result = match cmd {
        Command::Demo { messages, chaos } => run_demo(&settings, messages, chaos).await,
        Command::Config => print_config(&settings),
    };
    if let Err(e) = result {
        error!("Command failed: {}", e);
    }

    if let Err(e) = provider.shutdown() {
        warn!("Tracer provider shutdown failed: {}", e);
    }
}

fn print_config(settings: &Settings) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

async fn run_demo(settings: &Settings, messages: u32, chaos: bool) -> Result<()> {
    let broker = MemoryBroker::new();
    let topology = Topology::from(&settings.broker);
    let backoff = BackoffPolicy::from(&settings.reconnect);

    let setup = broker.connect()?;
    topology.declare(&setup.open_channel().await?).await?;
    setup.close().await?;

    let publisher = Publisher::start(broker.connect()?, broker.dialer(), backoff).await?;

    let cancel = CancellationToken::new();
    let processed = Arc::new(Mutex::new(BTreeSet::new()));
    let consumer = tokio::spawn(consume_tasks(
        broker.clone(),
        settings.broker.clone(),
        backoff,
        cancel.clone(),
        processed.clone(),
    ));

    for id in 0..messages {
        if chaos && id == messages / 2 {
            warn!("simulating broker outage");
            broker.refuse_next_dials(2);
            broker.drop_connections();
        }
        let task = Task {
            id,
            payload: format!("task #{id}"),
        };
        publish_with_retry(&publisher, &topology, &task)
            .instrument(info_span!("demo.produce", task.id = id))
            .await?;
    }

    let drained = tokio::time::timeout(Duration::from_secs(60), async {
        while processed.lock().len() < messages as usize {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            processed = processed.lock().len(),
            expected = messages,
            "timed out waiting for tasks"
        );
    }

    cancel.cancel();
    match consumer.await {
        Ok(Err(e)) => error!("Consumer failed: {}", e),
        Err(e) => error!("Consumer task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    publisher.close().await?;

    let stats = broker.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        acked = stats.acked,
        nacked = stats.nacked,
        "demo finished"
    );
    Ok(())
}

/// Publishes `task`, waiting out reconnect gaps.
async fn publish_with_retry(
    publisher: &Publisher<MemoryConnection>,
    topology: &Topology,
    task: &Task,
) -> Result<()> {
    loop {
        match publisher
            .publish_json(&topology.exchange, &topology.routing_key, task)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                warn!(task.id = task.id, error = %e, "publish failed, retrying");
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs consumers until cancelled, rebuilding one whenever its channel closes.
async fn consume_tasks(
    broker: MemoryBroker,
    settings: BrokerSettings,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
    processed: Arc<Mutex<BTreeSet<u32>>>,
) -> Result<()> {
    let mut delay = backoff.start();

    loop {
        let consumer = match open_consumer(&broker, &settings).await {
            Ok(consumer) => {
                delay = backoff.start();
                consumer
            }
            Err(e) => {
                warn!(error = %e, "failed to start consumer");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay.next_delay()) => continue,
                }
            }
        };

        let result = consumer
            .handle_json(&cancel, |task: Task| {
                let first_time = processed.lock().insert(task.id);
                async move {
                    info!(task.id = task.id, first_time, payload = %task.payload, "processed task");
                    Ok::<(), HandlerError>(())
                }
            })
            .await;

        match result {
            Err(MqError::ConsumerChannelClosed) => {
                warn!("consumer channel closed, rebuilding consumer");
            }
            Err(MqError::Cancelled) => {
                let _ = consumer.close().await;
                return Ok(());
            }
            Err(e) => return Err(e),
            Ok(()) => return Ok(()),
        }
    }
}

async fn open_consumer(broker: &MemoryBroker, settings: &BrokerSettings) -> Result<Consumer<MemoryChannel>> {
    let conn = broker.connect()?;
    Consumer::new(&conn, &settings.queue, settings.prefetch).await
}
