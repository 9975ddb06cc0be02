//! CLI argument parsing using `clap`.

use crate::config::DataSource;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments for `churnflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "churnflow",
    version,
    about = "Run the customer churn data pipeline around a supervised API service.",
    long_about = None
)]
pub struct CliArgs {
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the pipeline once.
    Run(RunArgs),
    /// Validate the configuration and print the execution order.
    Check(ConfigArgs),
}

/// Config file selection shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `churnflow.toml` in the current directory if present,
    /// built-in defaults otherwise.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Arguments of `churnflow run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Config file selection.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Where raw data comes from; overrides the config file.
    #[arg(long, value_enum, value_name = "SOURCE")]
    pub data_source: Option<DataSource>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CHURNFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log output format.
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only failures.
    Error,
    /// Failures and recoverable problems such as retries.
    Warn,
    /// Run and task lifecycle.
    Info,
    /// Resolved configuration, health polls and command output.
    Debug,
    /// Everything, including dependency crates' traces.
    Trace,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Log output format.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl CliArgs {
    /// Returns the level flag, if the command takes one.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        match &self.command {
            Command::Run(args) => args.log_level,
            Command::Check(_) => None,
        }
    }

    /// Returns the log format for the command.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        match &self.command {
            Command::Run(args) => args.log_format,
            Command::Check(_) => LogFormat::Pretty,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
#[must_use]
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
