//! Readiness probes for the supervised service.

use crate::errors::ProcessError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Default health endpoint of the churn API.
pub const DEFAULT_HEALTH_URL: &str = "http://127.0.0.1:8000/";

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The service answered and is ready.
    Ready,
    /// The service answered but is not ready yet.
    NotReady(String),
    /// Nothing is listening yet, or the request did not complete.
    Unreachable(String),
}

impl HealthStatus {
    /// Returns true if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::NotReady(reason) => write!(f, "not ready: {reason}"),
            Self::Unreachable(reason) => write!(f, "unreachable: {reason}"),
        }
    }
}

/// A readiness probe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Performs one probe.
    async fn probe(&self) -> HealthStatus;
}

/// Probes an HTTP endpoint; `200 OK` means ready.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthCheck {
    /// Creates a probe for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, ProcessError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProcessError::HealthCheck(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Returns the probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn probe(&self) -> HealthStatus {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => HealthStatus::Ready,
            Ok(resp) => HealthStatus::NotReady(format!("HTTP {}", resp.status())),
            Err(e) => HealthStatus::Unreachable(e.to_string()),
        }
    }
}
