//! BusBridge - log bus <-> queue bus bridge
//!
//! Usage:
//!   busbridge [OPTIONS] <CONFIG> [QUEUE] [TOPICS]...
//!
//! Arguments:
//!   <CONFIG>    Properties (or .toml) configuration file
//!   [QUEUE]     Queue to consume from (overrides sol_bridge_queue)
//!   [TOPICS]    Log bus topics, comma separated (overrides kaf_bridge_topics)
//!
//! Options:
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use busbridge::bridge::{BridgeEngine, EngineConfig, TopicTranslator};
use busbridge::codec::Renderers;
use busbridge::config::{BridgeSettings, Config};
use busbridge::diagnostics::{spawn_diagnostics_task, Diagnostics};
use busbridge::endpoint::drivers::{open_log_client, open_queue_client};
use busbridge::endpoint::{LogBus, QueueBus, QueueBusConfig};
use busbridge::{Metrics, MetricsServer};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// BusBridge - bidirectional log bus / queue bus bridge
#[derive(Parser, Debug)]
#[command(name = "busbridge")]
#[command(version)]
#[command(about = "Bidirectional bridge between a log bus and a queue bus")]
struct Args {
    /// Configuration file (properties format, or TOML with a .toml extension)
    config: PathBuf,

    /// Queue to bridge (overrides sol_bridge_queue)
    queue: Option<String>,

    /// Log bus topics, comma separated (overrides kaf_bridge_topics)
    topics: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Report a startup failure with usage and exit non-zero
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    eprintln!();
    eprintln!("{}", Args::command().render_usage());
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => fail(format!("loading {}: {}", args.config.display(), e)),
    };

    // Setup logging - RUST_LOG overrides CLI, CLI overrides config
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = args
            .log_level
            .map(LogLevel::as_directive)
            .unwrap_or(file_config.log_level.as_str());
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from {}", args.config.display());

    let settings = match BridgeSettings::resolve(&file_config, args.queue, &args.topics) {
        Ok(settings) => settings,
        Err(e) => fail(e),
    };
    let renderers = match Renderers::resolve(
        &file_config.bridge_key_codec,
        &file_config.bridge_value_codec,
    ) {
        Ok(renderers) => renderers,
        Err(e) => fail(e),
    };

    info!("Starting BusBridge");
    info!("  Queue: {}", settings.queue);
    info!("  Topics: {}", settings.topics.join(", "));
    info!(
        "  Drivers: log={} queue={}",
        file_config.bridge_log_driver, file_config.bridge_queue_driver
    );
    info!(
        "  Pool capacity: {} (prefill={})",
        file_config.bridge_pool_capacity, file_config.bridge_pool_prefill
    );
    info!("  Max records per poll: {}", file_config.bridge_poll_max_records);
    for (from, to) in &file_config.bridge_kafka_sol_topic_trans {
        info!("    {} -> {} (log -> queue)", from, to);
    }
    for (from, to) in &file_config.bridge_sol_kafka_topic_trans {
        info!("    {} -> {} (queue -> log)", from, to);
    }

    let metrics = Arc::new(Metrics::new());

    let log_client = open_log_client(
        &file_config.bridge_log_driver,
        &file_config.client_properties,
    )
    .unwrap_or_else(|e| fail(e));
    let queue_client = open_queue_client(
        &file_config.bridge_queue_driver,
        &file_config.client_properties,
    )
    .unwrap_or_else(|e| fail(e));

    let log_bus = Arc::new(LogBus::new(
        log_client,
        file_config.bridge_poll_max_records,
        renderers,
        metrics.clone(),
    ));
    let queue_bus = Arc::new(QueueBus::new(
        queue_client,
        QueueBusConfig {
            pool_capacity: file_config.bridge_pool_capacity,
            prefill: file_config.bridge_pool_prefill,
            send_attempts: file_config.bridge_send_attempts,
            renderers,
        },
        metrics.clone(),
    ));

    let mut engine = BridgeEngine::new(
        log_bus,
        queue_bus.clone(),
        TopicTranslator::from_pairs(file_config.bridge_kafka_sol_topic_trans.clone()),
        TopicTranslator::from_pairs(file_config.bridge_sol_kafka_topic_trans.clone()),
        EngineConfig {
            poll_timeout: file_config.bridge_poll_timeout,
            idle_backoff: file_config.bridge_idle_backoff,
        },
        metrics.clone(),
    );

    if let Err(e) = engine.start(&settings.queue, &settings.topics) {
        fail(e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let diagnostics = spawn_diagnostics_task(
        Diagnostics::new(queue_bus, metrics.clone()),
        file_config.bridge_stats_interval,
        shutdown_rx.clone(),
    );

    // Setup metrics if configured
    if file_config.metrics_enabled {
        info!("  Metrics: enabled (http://{})", file_config.metrics_bind);
        let metrics_server = MetricsServer::new(metrics.clone(), file_config.metrics_bind);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run(shutdown_rx).await {
                error!("Metrics server error: {}", e);
            }
        });
    } else {
        info!("  Metrics: disabled");
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive; dropping it would stop the bridge
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    engine.run(shutdown_rx).await;
    let _ = diagnostics.await;

    info!("BusBridge stopped");
    Ok(())
}
