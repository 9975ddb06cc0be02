//! Operations and service settings wired into the churn pipeline.

use crate::config::{PipelineConfig, ResolvedStep, ServiceConfig, Step};
use crate::errors::{ConfigurationError, ProcessError};
use crate::pipeline::RetryPolicy;
use crate::process::{HealthCheck, HttpHealthCheck, ProcessCommand};
use crate::tasks::{CommandOperation, TaskOperation};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// An operation with its retry policy.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    /// The operation to run.
    pub operation: Arc<dyn TaskOperation>,
    /// Retry policy applied to it.
    pub retry_policy: RetryPolicy,
}

impl PipelineStep {
    /// Creates a step with a single attempt.
    #[must_use]
    pub fn new(operation: Arc<dyn TaskOperation>) -> Self {
        Self {
            operation,
            retry_policy: RetryPolicy::none(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn from_resolved(step: ResolvedStep) -> Self {
        Self::new(Arc::new(command_operation(step.commands, step.working_dir)))
            .with_retry_policy(step.retry_policy)
    }
}

fn command_operation(commands: Vec<String>, working_dir: Option<PathBuf>) -> CommandOperation {
    let op = CommandOperation::sequence(commands);
    match working_dir {
        Some(dir) => op.with_working_dir(dir),
        None => op,
    }
}

/// The opaque operations of the churn pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSteps {
    /// Acquire raw data.
    pub get_data: PipelineStep,
    /// Load raw data; needs the service.
    pub ingest: PipelineStep,
    /// Validate raw data.
    pub validate: PipelineStep,
    /// Clean and encode.
    pub prepare: PipelineStep,
    /// Build and store features.
    pub transform: PipelineStep,
    /// Train models, if enabled.
    pub train: Option<PipelineStep>,
}

impl PipelineSteps {
    /// Creates the six mandatory steps.
    #[must_use]
    pub fn new(
        get_data: PipelineStep,
        ingest: PipelineStep,
        validate: PipelineStep,
        prepare: PipelineStep,
        transform: PipelineStep,
    ) -> Self {
        Self {
            get_data,
            ingest,
            validate,
            prepare,
            transform,
            train: None,
        }
    }

    /// Adds the training step after `transform`.
    #[must_use]
    pub fn with_train(mut self, train: PipelineStep) -> Self {
        self.train = Some(train);
        self
    }

    /// Builds command-backed steps from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a mandatory step is disabled.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        let required = |step: Step| {
            config
                .resolve_step(step)
                .map(PipelineStep::from_resolved)
                .ok_or_else(|| {
                    ConfigurationError::invalid(format!("step '{}' cannot be disabled", step.id()))
                })
        };

        let acquire = command_operation(
            config.acquire.commands(config.data_source),
            config.working_dir.clone(),
        )
        .with_env("CHURNFLOW_DATA_SOURCE", config.data_source.to_string());
        let get_data =
            PipelineStep::new(Arc::new(acquire)).with_retry_policy(config.acquire.retry_policy());

        let mut steps = Self::new(
            get_data,
            required(Step::Ingest)?,
            required(Step::Validate)?,
            required(Step::Prepare)?,
            required(Step::Transform)?,
        );
        if let Some(train) = config.resolve_step(Step::Train) {
            steps = steps.with_train(PipelineStep::from_resolved(train));
        }
        Ok(steps)
    }
}

/// How the controller launches and supervises the service.
#[derive(Clone)]
pub struct ServiceSettings {
    /// Name used in logs and events.
    pub name: String,
    /// Launch command.
    pub command: ProcessCommand,
    /// Readiness probe.
    pub health_check: Arc<dyn HealthCheck>,
    /// Number of probes before giving up.
    pub max_retries: u32,
    /// Pause between probes.
    pub retry_delay: Duration,
    /// Graceful shutdown window before a forced kill.
    pub graceful_timeout: Duration,
    /// Start only after `get_data` succeeded.
    pub requires_data: bool,
}

impl fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("name", &self.name)
            .field("command", &self.command.to_string())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("graceful_timeout", &self.graceful_timeout)
            .field("requires_data", &self.requires_data)
            .finish_non_exhaustive()
    }
}

impl ServiceSettings {
    /// Creates settings with the standard readiness and shutdown timings.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: ProcessCommand,
        health_check: Arc<dyn HealthCheck>,
    ) -> Self {
        let defaults = ServiceConfig::default();
        Self {
            name: name.into(),
            command,
            health_check,
            max_retries: defaults.max_retries,
            retry_delay: defaults.retry_delay(),
            graceful_timeout: defaults.graceful_timeout(),
            requires_data: defaults.requires_data,
        }
    }

    /// Sets the readiness polling budget.
    #[must_use]
    pub fn with_readiness(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the graceful shutdown window.
    #[must_use]
    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Makes the service wait for data acquisition.
    #[must_use]
    pub fn requiring_data(mut self, requires_data: bool) -> Self {
        self.requires_data = requires_data;
        self
    }

    /// Builds settings probing the configured HTTP endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP health check cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ProcessError> {
        let service = &config.service;
        let health = HttpHealthCheck::new(&service.health_url, service.health_request_timeout())?;
        Ok(Self::new(
            &service.name,
            service.process_command(config.working_dir.as_ref()),
            Arc::new(health),
        )
        .with_readiness(service.max_retries, service.retry_delay())
        .with_graceful_timeout(service.graceful_timeout())
        .requiring_data(service.requires_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSource;

    #[test]
    fn test_steps_from_default_config() {
        let steps = PipelineSteps::from_config(&PipelineConfig::default()).unwrap();

        assert_eq!(steps.get_data.retry_policy.max_attempts, 4);
        assert_eq!(steps.ingest.retry_policy.delay, Duration::from_secs(5));
        assert_eq!(steps.validate.retry_policy, RetryPolicy::none());
        assert!(steps.train.is_some());
        assert!(format!("{:?}", steps.get_data.operation).contains("generate_csv_data"));
    }

    #[test]
    fn test_kaggle_source_selects_download_command() {
        let config = PipelineConfig {
            data_source: DataSource::Kaggle,
            ..PipelineConfig::default()
        };
        let steps = PipelineSteps::from_config(&config).unwrap();
        assert!(format!("{:?}", steps.get_data.operation).contains("data_ingest_kaggle"));
    }

    #[test]
    fn test_disabling_mandatory_step_is_rejected() {
        let mut config = PipelineConfig::default();
        config.steps.ingest.enabled = false;
        assert_eq!(
            PipelineSteps::from_config(&config).unwrap_err().code(),
            "CONFIG-INVALID"
        );
    }

    #[tokio::test]
    async fn test_service_settings_from_config() {
        let mut config = PipelineConfig::default();
        config.service.requires_data = true;
        config.service.max_retries = 4;

        let settings = ServiceSettings::from_config(&config).unwrap();

        assert_eq!(settings.max_retries, 4);
        assert_eq!(settings.retry_delay, Duration::from_secs(3));
        assert_eq!(settings.graceful_timeout, Duration::from_secs(10));
        assert!(settings.requires_data);
        assert_eq!(settings.command.to_string(), "python src/mock_api.py");
    }
}
