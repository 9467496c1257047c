//! # Queue-Mover CLI
//!
//! Command-line interface for moving messages between queues.
//!
//! Configuration is layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Optional configuration file (`--config` or `QUEUE_MOVER_CONFIG`), TOML or YAML
//! 3. Environment variables prefixed `QUEUE_MOVER__` with `__` as the nesting
//!    separator, e.g. `QUEUE_MOVER__MOVER__BATCH_SIZE=5`
//! 4. Command-line flags

use clap::{Parser, ValueEnum};
use queue_mover_core::{Coordinator, MoveReport, MoverConfig, MoverError};
use queue_mover_runtime::{ProviderConfig, ProviderFactory, QueueClient, QueueError, QueueName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "QUEUE_MOVER";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Mover CLI - move messages from one queue to another
#[derive(Parser, Debug)]
#[command(name = "queue-mover")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Move messages from a source queue to a destination queue")]
#[command(
    long_about = "Queue-Mover consumes messages from a source queue, sends each body to a \
                  destination queue and deletes the original only after the send succeeded"
)]
pub struct Cli {
    /// Source queue URL or name
    #[arg(long)]
    pub src: String,

    /// Destination queue URL or name
    #[arg(long)]
    pub dst: String,

    /// Stop after moving this many messages
    #[arg(short = 'n', long)]
    pub num_messages: Option<u64>,

    /// Seconds without new messages before the move ends [default: 5]
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Messages held between fetching and forwarding [default: 100]
    #[arg(long)]
    pub buffer_capacity: Option<usize>,

    /// Queue provider [default: sqs]
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// AWS region of the queues
    #[arg(long)]
    pub region: Option<String>,

    /// SQS endpoint override, e.g. a LocalStack URL
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "QUEUE_MOVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging and print the final report as JSON
    #[arg(long)]
    pub json_logs: bool,
}

/// Queue providers selectable on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Amazon SQS
    Sqs,
    /// In-process queues, for dry runs
    Memory,
}

impl ProviderKind {
    /// Tag used for the provider in configuration sources
    fn config_tag(&self) -> &'static str {
        match self {
            Self::Sqs => "aws_sqs",
            Self::Memory => "in_memory",
        }
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue provider setup failed: {0}")]
    ProviderSetup(#[source] QueueError),

    #[error("Move failed: {0}")]
    Pipeline(#[source] MoverError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[source] MoverError),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Resolved application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pipeline settings
    pub mover: MoverConfig,

    /// Queue provider shared by the source and destination
    pub provider: ProviderConfig,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(&cli)?;
    let report = execute_move(&cli, config).await?;

    if cli.json_logs {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", report),
        }
    } else {
        println!("{}", report);
    }

    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so the
/// final report is the only thing written to stdout.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    // A subscriber is already installed when the CLI runs inside a test harness
    if let Err(e) = result {
        debug!(error = %e, "Global subscriber already set, keeping it");
    }
    Ok(())
}

/// Resolve configuration from defaults, file, environment and flags
pub fn load_configuration(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder().set_default("provider.type", "aws_sqs")?;

    if let Some(path) = cli.config.as_deref() {
        builder = builder.add_source(config_file(path)?);
        info!(path = %path.display(), "Loading configuration file");
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder = builder
        .set_override_option("mover.max_messages", cli.num_messages)?
        .set_override_option("mover.idle_timeout_seconds", cli.idle_timeout)?
        .set_override_option(
            "mover.buffer_capacity",
            cli.buffer_capacity.map(|c| c as u64),
        )?
        .set_override_option("provider.type", cli.provider.map(|p| p.config_tag()))?
        .set_override_option("provider.region", cli.region.clone())?
        .set_override_option("provider.endpoint_url", cli.endpoint_url.clone())?;

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.mover.validate().map_err(ConfigError::Invalid)?;

    Ok(config)
}

fn config_file(
    path: &Path,
) -> Result<config::File<config::FileSourceFile, config::FileFormat>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(config::File::from(path).required(true))
}

/// Parse a queue argument
fn parse_queue(arg: &str, value: &str) -> Result<QueueName, CliError> {
    QueueName::new(value.to_string()).map_err(|e| CliError::InvalidArgument {
        arg: arg.to_string(),
        message: e.to_string(),
    })
}

/// Run the move described by `cli` and `config` until it completes or the
/// process is interrupted
pub async fn execute_move(cli: &Cli, config: AppConfig) -> Result<MoveReport, CliError> {
    let source = parse_queue("--src", &cli.src)?;
    let destination = parse_queue("--dst", &cli.dst)?;
    if source == destination {
        return Err(CliError::InvalidArgument {
            arg: "--dst".to_string(),
            message: "destination must differ from the source queue".to_string(),
        });
    }

    info!(
        source = %source,
        destination = %destination,
        provider = ?config.provider,
        "Preparing queue move"
    );

    let provider = ProviderFactory::create_provider(config.provider)
        .await
        .map_err(CliError::ProviderSetup)?;

    let coordinator = Coordinator::new(
        QueueClient::new(provider.clone(), source),
        QueueClient::new(provider, destination),
        config.mover,
    )
    .map_err(|e| CliError::Configuration(ConfigError::Invalid(e)))?;

    coordinator.run().await.map_err(CliError::Pipeline)
}
