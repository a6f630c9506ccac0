//! Command line configuration

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact, human-readable logs.
    Compact,

    /// Structured JSON logs.
    Json,
}

/// Logging settings.
#[derive(Debug, Args)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log format (compact, json)
    #[arg(
        long,
        global = true,
        env = "LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Compact
    )]
    pub log_format: LogFormat,
}

/// Tollgate command line configuration
#[derive(Debug, Parser)]
#[command(
    name = "tollgate",
    about = "Drive checkout sessions from scenario files",
    long_about = None
)]
pub struct CliConfig {
    /// Logging output settings.
    #[command(flatten)]
    pub logging: LoggingConfig,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a checkout scenario against in-memory services
    Run(RunArgs),
}

/// Arguments to `tollgate run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scenario file (YAML)
    pub scenario: PathBuf,

    /// Customer the checkout session belongs to
    #[arg(long, env = "TOLLGATE_CUSTOMER", default_value = "customer-1")]
    pub customer: String,

    /// Milliseconds to wait for a payment gateway before leaving the charge pending
    #[arg(long, env = "TOLLGATE_GATEWAY_TIMEOUT_MS", default_value_t = 30_000u64)]
    pub gateway_timeout_ms: u64,
}

impl RunArgs {
    /// Gateway timeout as a [`Duration`].
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

impl CliConfig {
    /// Load configuration from environment and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be parsed
    pub fn load() -> Result<Self, clap::Error> {
        // Load .env file if present (ignore if missing)
        _ = dotenvy::dotenv();

        Self::try_parse()
    }
}
