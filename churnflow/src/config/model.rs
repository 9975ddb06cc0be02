//! Configuration file model.

use crate::errors::ConfigurationError;
use crate::pipeline::{RetryPolicy, SchedulerConfig};
use crate::process::{ProcessCommand, DEFAULT_HEALTH_URL};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where raw data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Generate synthetic customer accounts locally.
    #[default]
    Synthetic,
    /// Download the Telco churn dataset from Kaggle.
    Kaggle,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthetic => f.write_str("synthetic"),
            Self::Kaggle => f.write_str("kaggle"),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name used in logs and reports.
    #[serde(default = "default_name")]
    pub name: String,

    /// Raw data source.
    #[serde(default)]
    pub data_source: DataSource,

    /// Project root; commands and the service run here unless overridden.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// The auxiliary API service.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Data acquisition (`get_data`).
    #[serde(default)]
    pub acquire: AcquireConfig,

    /// The remaining processing steps.
    #[serde(default)]
    pub steps: StepsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_source: DataSource::default(),
            working_dir: None,
            scheduler: SchedulerConfig::default(),
            service: ServiceConfig::default(),
            acquire: AcquireConfig::default(),
            steps: StepsConfig::default(),
        }
    }
}

fn default_name() -> String {
    "customer-churn".to_string()
}

/// Settings of the supervised API service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Name used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Program to launch.
    #[serde(default = "default_service_command")]
    pub command: String,
    /// Arguments to the program.
    #[serde(default = "default_service_args")]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory override.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Health endpoint; `200 OK` means ready.
    #[serde(default = "default_health_url")]
    pub health_url: String,
    /// Per-probe HTTP timeout.
    #[serde(default = "default_health_request_timeout")]
    pub health_request_timeout_seconds: u64,
    /// Number of health probes before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between health probes.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// How long to wait after the graceful signal before killing.
    #[serde(default = "default_graceful_timeout")]
    pub graceful_timeout_seconds: u64,
    /// Start the service only after data acquisition succeeded.
    #[serde(default)]
    pub requires_data: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            command: default_service_command(),
            args: default_service_args(),
            env: BTreeMap::new(),
            working_dir: None,
            health_url: default_health_url(),
            health_request_timeout_seconds: default_health_request_timeout(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            graceful_timeout_seconds: default_graceful_timeout(),
            requires_data: false,
        }
    }
}

fn default_service_name() -> String {
    "mock-api".to_string()
}

fn default_service_command() -> String {
    "python".to_string()
}

fn default_service_args() -> Vec<String> {
    vec!["src/mock_api.py".to_string()]
}

fn default_health_url() -> String {
    DEFAULT_HEALTH_URL.to_string()
}

fn default_health_request_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    3
}

fn default_graceful_timeout() -> u64 {
    10
}

impl ServiceConfig {
    /// Builds the launch command, falling back to `root` for the working dir.
    #[must_use]
    pub fn process_command(&self, root: Option<&PathBuf>) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.command).args(self.args.iter().cloned());
        command.env = self.env.clone();
        command.working_dir = self.working_dir.clone().or_else(|| root.cloned());
        command
    }

    /// Per-probe HTTP timeout.
    #[must_use]
    pub fn health_request_timeout(&self) -> Duration {
        Duration::from_secs(self.health_request_timeout_seconds)
    }

    /// Pause between health probes.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    /// Graceful shutdown window.
    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_seconds)
    }
}

/// Data acquisition commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Command generating synthetic data.
    #[serde(default = "default_synthetic")]
    pub synthetic: String,
    /// Command downloading the Kaggle dataset.
    #[serde(default = "default_kaggle")]
    pub kaggle: String,
    /// Command generating the mock API's payload; empty disables it.
    #[serde(default = "default_api_data")]
    pub api_data: String,
    /// Total attempts for the whole acquisition step.
    #[serde(default = "default_acquire_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts.
    #[serde(default = "default_acquire_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            synthetic: default_synthetic(),
            kaggle: default_kaggle(),
            api_data: default_api_data(),
            max_attempts: default_acquire_attempts(),
            retry_delay_seconds: default_acquire_delay(),
        }
    }
}

fn default_synthetic() -> String {
    "python src/generate_csv_data.py".to_string()
}

fn default_kaggle() -> String {
    "python src/data_ingest_kaggle.py".to_string()
}

fn default_api_data() -> String {
    "python src/generate_api_data.py".to_string()
}

fn default_acquire_attempts() -> u32 {
    4
}

fn default_acquire_delay() -> u64 {
    10
}

impl AcquireConfig {
    /// Commands run by `get_data` for `source`, in order.
    #[must_use]
    pub fn commands(&self, source: DataSource) -> Vec<String> {
        let primary = match source {
            DataSource::Synthetic => &self.synthetic,
            DataSource::Kaggle => &self.kaggle,
        };
        std::iter::once(primary)
            .chain(Some(&self.api_data).filter(|c| !c.trim().is_empty()))
            .cloned()
            .collect()
    }

    /// Retry policy of `get_data`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_seconds))
    }
}

/// A processing step after acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Load raw data into the database.
    Ingest,
    /// Check the raw data.
    Validate,
    /// Clean and encode.
    Prepare,
    /// Build and store features.
    Transform,
    /// Train and log models.
    Train,
}

impl Step {
    /// All steps in chain order.
    pub const ALL: [Self; 5] = [
        Self::Ingest,
        Self::Validate,
        Self::Prepare,
        Self::Transform,
        Self::Train,
    ];

    /// Task id of the step.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Validate => "validate",
            Self::Prepare => "prepare",
            Self::Transform => "transform",
            Self::Train => "train",
        }
    }

    fn default_command(self) -> &'static str {
        match self {
            Self::Ingest => "python src/ingest.py",
            Self::Validate => "python src/validate_raw_data.py",
            Self::Prepare => "python src/prepare_data.py",
            Self::Transform => "python src/transform_and_store.py",
            Self::Train => "python src/train_model_with_feature_store.py",
        }
    }

    fn default_retry_policy(self) -> RetryPolicy {
        match self {
            Self::Ingest => RetryPolicy::new(4, Duration::from_secs(5)),
            _ => RetryPolicy::none(),
        }
    }
}

/// Overrides for one step; unset fields fall back to the step's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Commands to run in order. Accepts `command = "..."` as well.
    #[serde(default, alias = "command", deserialize_with = "one_or_many")]
    pub commands: Vec<String>,
    /// Total attempts.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Pause between attempts.
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    /// Working directory override.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Whether the step runs at all. Only `train` may be disabled.
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            max_attempts: None,
            retry_delay_seconds: None,
            working_dir: None,
            enabled: true,
        }
    }
}

fn enabled() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(command) => vec![command],
        OneOrMany::Many(commands) => commands,
    })
}

/// Per-step overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsConfig {
    /// `ingest` overrides.
    #[serde(default)]
    pub ingest: StepConfig,
    /// `validate` overrides.
    #[serde(default)]
    pub validate: StepConfig,
    /// `prepare` overrides.
    #[serde(default)]
    pub prepare: StepConfig,
    /// `transform` overrides.
    #[serde(default)]
    pub transform: StepConfig,
    /// `train` overrides.
    #[serde(default)]
    pub train: StepConfig,
}

impl StepsConfig {
    /// Returns the overrides of `step`.
    #[must_use]
    pub fn get(&self, step: Step) -> &StepConfig {
        match step {
            Step::Ingest => &self.ingest,
            Step::Validate => &self.validate,
            Step::Prepare => &self.prepare,
            Step::Transform => &self.transform,
            Step::Train => &self.train,
        }
    }
}

/// A step with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    /// Task id.
    pub id: &'static str,
    /// Commands to run.
    pub commands: Vec<String>,
    /// Retry policy.
    pub retry_policy: RetryPolicy,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Resolves `step` against its built-in defaults.
    ///
    /// Returns `None` when the step is disabled.
    #[must_use]
    pub fn resolve_step(&self, step: Step) -> Option<ResolvedStep> {
        let overrides = self.steps.get(step);
        if !overrides.enabled {
            return None;
        }
        let defaults = step.default_retry_policy();
        let commands = if overrides.commands.is_empty() {
            vec![step.default_command().to_string()]
        } else {
            overrides.commands.clone()
        };
        Some(ResolvedStep {
            id: step.id(),
            commands,
            retry_policy: RetryPolicy::new(
                overrides.max_attempts.unwrap_or(defaults.max_attempts),
                overrides
                    .retry_delay_seconds
                    .map_or(defaults.delay, Duration::from_secs),
            ),
            working_dir: overrides
                .working_dir
                .clone()
                .or_else(|| self.working_dir.clone()),
        })
    }

    /// Checks values that parse but make no sense.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::invalid("name must not be empty"));
        }
        if self.scheduler.max_concurrency == Some(0) {
            return Err(ConfigurationError::invalid(
                "scheduler.max_concurrency must be at least 1 (omit it for unbounded)",
            ));
        }

        let service = &self.service;
        if service.command.trim().is_empty() {
            return Err(ConfigurationError::invalid("service.command must not be empty"));
        }
        if !(service.health_url.starts_with("http://") || service.health_url.starts_with("https://")) {
            return Err(ConfigurationError::invalid(format!(
                "service.health_url must be an http(s) URL, got '{}'",
                service.health_url
            )));
        }
        if service.max_retries == 0 {
            return Err(ConfigurationError::invalid("service.max_retries must be at least 1"));
        }
        if service.health_request_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid(
                "service.health_request_timeout_seconds must be at least 1",
            ));
        }

        if self.acquire.max_attempts == 0 {
            return Err(ConfigurationError::invalid_retry("get_data"));
        }
        if self.acquire.commands(self.data_source)[0].trim().is_empty() {
            return Err(ConfigurationError::invalid(format!(
                "acquire.{} must not be empty",
                self.data_source
            )));
        }

        for step in Step::ALL {
            if step != Step::Train && !self.steps.get(step).enabled {
                return Err(ConfigurationError::invalid(format!(
                    "step '{}' cannot be disabled",
                    step.id()
                )));
            }
            let Some(resolved) = self.resolve_step(step) else {
                continue;
            };
            if resolved.retry_policy.max_attempts == 0 {
                return Err(ConfigurationError::invalid_retry(resolved.id));
            }
            if resolved.commands.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigurationError::invalid(format!(
                    "step '{}' has an empty command",
                    resolved.id
                )));
            }
        }
        Ok(())
    }
}
