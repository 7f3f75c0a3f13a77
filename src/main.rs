//! Flowbridge binary.
//!
//! Loads a YAML flow configuration, builds the configured topology and runs
//! it until SIGINT/SIGTERM. The signal handler triggers the flow's shutdown
//! protocol exactly once; final metrics are logged on exit regardless of
//! outcome.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowbridge::adapters::AdapterRegistry;
use flowbridge::{build_flow, Flow, FlowConfig, ProcessorRegistry};

/// Flowbridge - bridge between pub/sub message systems
#[derive(Parser, Debug)]
#[command(name = "flowbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Configurable bridge between pub/sub message systems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured flow until interrupted
    Run {
        /// Path to configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Validate a configuration file and print a summary
    Check {
        /// Path to configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Check { config } => check(config),
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting flowbridge"
    );

    let config = FlowConfig::load(&config_path)?;
    info!(
        mode = %config.mode,
        max_workers = config.thread_pool.max_workers,
        queue_size = config.thread_pool.queue_size,
        back_pressure = config.back_pressure.enabled,
        "Configuration loaded"
    );

    let adapters = AdapterRegistry::with_builtins();
    let processors = ProcessorRegistry::with_builtins();
    let flow: Arc<dyn Flow> = build_flow(&config, &adapters, &processors)?;

    // Signal handler: calls shutdown() exactly once.
    let signal_flow = flow.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tokio::task::spawn_blocking(move || signal_flow.shutdown()).await;
    });

    // The threaded flow blocks until shutdown completes.
    let run_flow = flow.clone();
    let outcome = tokio::task::spawn_blocking(move || run_flow.run()).await?;

    let snapshot = flow.metrics().snapshot();
    info!(
        uptime_seconds = snapshot.uptime_seconds,
        metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
        "Final metrics"
    );

    if let Err(e) = outcome {
        error!(error = %e, "Error running flow");
        return Err(e.into());
    }

    info!("Flowbridge stopped");
    Ok(())
}

fn check(config_path: PathBuf) -> Result<()> {
    let config = FlowConfig::load(&config_path)?;

    println!("Configuration OK");
    println!("  mode:         {}", config.mode);
    println!("  max_workers:  {}", config.thread_pool.max_workers);
    println!("  queue_size:   {}", config.thread_pool.queue_size);
    println!(
        "  back_pressure: enabled={} high={} low={}",
        config.back_pressure.enabled,
        config.back_pressure.queue_high_watermark,
        config.back_pressure.queue_low_watermark
    );
    if let Some(processor) = &config.processor_class {
        println!("  processor:    {processor}");
    }

    if let Some(funnel) = &config.funnel {
        println!(
            "  funnel:       {} source(s) -> topic {}",
            funnel.sources.len(),
            funnel.destination_topic
        );
    }
    if let Some(fan) = &config.fan {
        println!(
            "  fan:          topic {} -> resolver {}:{}",
            fan.source_topic, fan.destination_resolver.kind, fan.destination_resolver.key
        );
    }
    if let Some(one_to_one) = &config.one_to_one {
        println!("  one_to_one:   {} mapping(s)", one_to_one.mappings.len());
        for mapping in &one_to_one.mappings {
            println!(
                "                {} -> {}",
                mapping.source_topic, mapping.destination_topic
            );
        }
    }

    Ok(())
}
