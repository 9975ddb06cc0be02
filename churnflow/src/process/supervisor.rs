//! Lifecycle supervision of one external service process.

use super::{HealthCheck, HealthStatus, ProcessCommand};
use crate::context::RunContext;
use crate::errors::ProcessError;
use crate::tasks::forward_lines;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of a [`ManagedProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Not launched yet.
    #[default]
    NotStarted,
    /// Launched, waiting for the health check.
    Starting,
    /// Health check passed.
    Ready,
    /// Termination in progress.
    Stopping,
    /// Terminated and reaped.
    Stopped,
    /// Never became ready.
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a call to [`ManagedProcess::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// There was nothing left to stop.
    AlreadyStopped,
    /// The process had already exited on its own and was reaped.
    Exited,
    /// The process exited after the graceful signal.
    Graceful,
    /// The graceful wait ran out and the process was killed.
    Escalated,
}

/// Supervises a single launch of an external service.
///
/// An instance is single-use: once stopped it cannot be restarted. The child
/// handle never leaves the instance, and dropping the instance kills any
/// child that is still running.
pub struct ManagedProcess {
    name: String,
    command: ProcessCommand,
    health_check: Arc<dyn HealthCheck>,
    state: ProcessState,
    child: Option<Child>,
    run: Option<Arc<RunContext>>,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("name", &self.name)
            .field("command", &self.command.to_string())
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl ManagedProcess {
    /// Creates a supervisor; nothing is launched until [`start`](Self::start).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: ProcessCommand,
        health_check: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            health_check,
            state: ProcessState::NotStarted,
            child: None,
            run: None,
        }
    }

    /// Emits lifecycle events to the run's sink.
    #[must_use]
    pub fn with_run_context(mut self, run: Arc<RunContext>) -> Self {
        self.run = Some(run);
        self
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Returns the OS pid while a child is held.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Launches the process without waiting for readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was already started or cannot be spawned.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.state != ProcessState::NotStarted {
            return Err(ProcessError::AlreadyStarted(self.state.to_string()));
        }

        let mut child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = ProcessState::Failed;
                return Err(ProcessError::Spawn {
                    program: self.command.program.clone(),
                    source,
                });
            }
        };

        let origin = format!("service:{}", self.name);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(origin.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(origin, "stderr", stderr);
        }

        let pid = child.id();
        self.child = Some(child);
        self.state = ProcessState::Starting;

        info!(service = %self.name, pid, cmd = %self.command, "service launched");
        self.emit("process.started", serde_json::json!({ "pid": pid }));
        Ok(())
    }

    /// Polls the health check until it reports ready.
    ///
    /// Probes at most `max_retries` times, sleeping `retry_delay` between
    /// probes. Fails early if the process exits while starting.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::StartupTimeout`] when every probe failed,
    /// [`ProcessError::ExitedDuringStartup`] when the child died, and a state
    /// error when the process is not starting.
    pub async fn await_ready(
        &mut self,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<(), ProcessError> {
        match self.state {
            ProcessState::Ready => return Ok(()),
            ProcessState::Starting => {}
            ProcessState::NotStarted => return Err(ProcessError::NotStarted),
            other => return Err(ProcessError::NotRunning(other.to_string())),
        }

        let began = Instant::now();
        for attempt in 1..=max_retries {
            if let Some(code) = self.exited()? {
                self.state = ProcessState::Failed;
                warn!(service = %self.name, exit_code = code, "service exited during startup");
                self.emit(
                    "process.startup_failed",
                    serde_json::json!({ "reason": "exited", "exit_code": code }),
                );
                return Err(ProcessError::ExitedDuringStartup { code });
            }

            match self.health_check.probe().await {
                HealthStatus::Ready => {
                    self.state = ProcessState::Ready;
                    info!(service = %self.name, attempt, "service ready");
                    self.emit("process.ready", serde_json::json!({ "probes": attempt }));
                    return Ok(());
                }
                status => {
                    debug!(service = %self.name, attempt, max_retries, %status, "service not ready");
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(retry_delay).await;
            }
        }

        self.state = ProcessState::Failed;
        let waited = began.elapsed();
        warn!(service = %self.name, attempts = max_retries, ?waited, "service never became ready");
        self.emit(
            "process.startup_failed",
            serde_json::json!({ "reason": "timeout", "probes": max_retries }),
        );
        Err(ProcessError::StartupTimeout {
            attempts: max_retries,
            waited,
        })
    }

    /// Terminates the process: graceful signal first, forced kill once
    /// `graceful_timeout` has elapsed.
    ///
    /// Idempotent; ends in `Stopped` whatever the starting state.
    ///
    /// # Errors
    ///
    /// Returns an error if signalling or reaping the child failed. The state
    /// is `Stopped` even then.
    pub async fn stop(&mut self, graceful_timeout: Duration) -> Result<StopOutcome, ProcessError> {
        let Some(mut child) = self.child.take() else {
            self.state = ProcessState::Stopped;
            return Ok(StopOutcome::AlreadyStopped);
        };

        self.state = ProcessState::Stopping;
        let pid = child.id();
        let result = terminate(&mut child, graceful_timeout).await;
        self.state = ProcessState::Stopped;

        match &result {
            Ok(StopOutcome::Escalated) => {
                warn!(service = %self.name, pid, ?graceful_timeout, "graceful shutdown timed out; killed");
                self.emit(
                    "process.stop_escalated",
                    serde_json::json!({ "pid": pid, "graceful_timeout_ms": graceful_timeout.as_millis() }),
                );
            }
            Ok(outcome) => info!(service = %self.name, pid, ?outcome, "service stopped"),
            Err(e) => warn!(service = %self.name, pid, error = %e, "error while stopping service"),
        }
        if let Ok(outcome) = &result {
            self.emit("process.stopped", serde_json::json!({ "pid": pid, "outcome": outcome }));
        }
        result
    }

    /// Starts killing the child without waiting. Used where awaiting is
    /// impossible.
    pub fn force_kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(service = %self.name, error = %e, "failed to kill service");
            } else {
                warn!(service = %self.name, "service killed without graceful shutdown");
            }
        }
        self.state = ProcessState::Stopped;
    }

    fn exited(&mut self) -> Result<Option<Option<i32>>, ProcessError> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?.map(|status| status.code())),
            None => Ok(Some(None)),
        }
    }

    fn emit(&self, kind: &str, data: serde_json::Value) {
        if let Some(run) = &self.run {
            run.emit_task(kind, &self.name, data);
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.force_kill();
    }
}

async fn terminate(child: &mut Child, graceful_timeout: Duration) -> Result<StopOutcome, ProcessError> {
    if child.try_wait()?.is_some() {
        return Ok(StopOutcome::Exited);
    }

    if let Err(e) = send_terminate(child) {
        warn!(error = %e, "graceful signal failed; killing");
        child.kill().await?;
        return Ok(StopOutcome::Escalated);
    }

    match timeout(graceful_timeout, child.wait()).await {
        Ok(status) => {
            status?;
            Ok(StopOutcome::Graceful)
        }
        Err(_) => {
            child.kill().await?;
            Ok(StopOutcome::Escalated)
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> Result<(), ProcessError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let raw = i32::try_from(pid).map_err(|e| ProcessError::Signal {
        pid,
        message: e.to_string(),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| ProcessError::Signal {
        pid,
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> Result<(), ProcessError> {
    child.start_kill().map_err(ProcessError::from)
}
