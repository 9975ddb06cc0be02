//! Operation that runs external shell commands.

use super::TaskOperation;
use crate::context::TaskContext;
use crate::errors::OperationError;
use crate::process::ProcessCommand;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// Runs one or more shell commands in order; the first non-zero exit fails
/// the attempt.
///
/// A non-zero exit code is a transient failure, so the task's retry policy
/// applies. A command that cannot be spawned at all fails permanently.
#[derive(Debug, Clone, Default)]
pub struct CommandOperation {
    commands: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandOperation {
    /// Creates an operation running a single command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self::sequence([command.into()])
    }

    /// Creates an operation running several commands in order.
    #[must_use]
    pub fn sequence(commands: impl IntoIterator<Item = String>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sets the working directory for every command.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Returns the commands in execution order.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    fn process_command(&self, command: &str) -> ProcessCommand {
        let mut cmd = ProcessCommand::shell(command);
        cmd.env.extend(self.env.clone());
        cmd.working_dir.clone_from(&self.working_dir);
        cmd
    }

    async fn run_one(&self, ctx: &TaskContext, command: &str) -> Result<(), OperationError> {
        info!(task = %ctx.task_id(), attempt = ctx.attempt(), cmd = %command, "starting command");

        let mut child = self.process_command(command).to_command().spawn().map_err(|e| {
            OperationError::permanent(format!("spawning '{command}': {e}"))
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(ctx.task_id().to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(ctx.task_id().to_string(), "stderr", stderr);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| OperationError::transient(format!("waiting for '{command}': {e}")))?;

        info!(
            task = %ctx.task_id(),
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "command exited"
        );

        if status.success() {
            Ok(())
        } else {
            Err(OperationError::transient(format!(
                "command '{command}' exited with {}",
                status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
            )))
        }
    }
}

#[async_trait]
impl TaskOperation for CommandOperation {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError> {
        if self.commands.is_empty() {
            return Err(OperationError::permanent("no command configured"));
        }
        for command in &self.commands {
            self.run_one(ctx, command).await?;
        }
        Ok(())
    }
}

/// Consumes a child pipe so its buffer never fills, logging each line at debug.
pub(crate) fn forward_lines<R>(origin: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(origin = %origin, stream, "{}", line);
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity};
    use std::sync::Arc;

    fn ctx() -> TaskContext {
        TaskContext::new(Arc::new(RunContext::new(RunIdentity::new("test"))), "cmd", 1)
    }

    #[tokio::test]
    async fn test_successful_sequence() {
        let op = CommandOperation::sequence(["true".to_string(), "echo done".to_string()]);
        assert!(op.execute(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_transient() {
        let op = CommandOperation::new("exit 3");
        let err = op.execute(&ctx()).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(err.message.contains("code 3"));
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("second-ran");
        let op = CommandOperation::sequence([
            "false".to_string(),
            format!("touch {}", marker.display()),
        ]);

        assert!(op.execute(&ctx()).await.is_err());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let op = CommandOperation::new("test \"$CHURN_SOURCE\" = synthetic && touch out.csv")
            .with_env("CHURN_SOURCE", "synthetic")
            .with_working_dir(dir.path());

        assert!(op.execute(&ctx()).await.is_ok());
        assert!(dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_commands_launch_through_process_command() {
        let op = CommandOperation::new("make features")
            .with_env("CHURN_SOURCE", "kaggle")
            .with_working_dir("/srv/churn");

        let cmd = op.process_command("make features");

        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-c".to_string(), "make features".to_string()]);
        assert_eq!(cmd.env.get("CHURN_SOURCE").map(String::as_str), Some("kaggle"));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/srv/churn")));
    }

    #[tokio::test]
    async fn test_empty_command_list_is_permanent() {
        let op = CommandOperation::default();
        let err = op.execute(&ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
