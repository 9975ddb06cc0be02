//! Scoped cleanup for a supervised process.

use super::{ManagedProcess, StopOutcome};
use crate::errors::ProcessError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Shared handle to a supervised process.
pub type SharedProcess = Arc<Mutex<ManagedProcess>>;

/// Guarantees a started process is torn down exactly once.
///
/// [`release`](Self::release) performs the graceful stop. If the guard is
/// dropped without being released (early return, panic, cancelled future),
/// the child is killed immediately instead.
#[derive(Debug)]
pub struct ProcessGuard {
    process: SharedProcess,
    graceful_timeout: Duration,
    released: bool,
}

impl ProcessGuard {
    /// Guards `process`, stopping it with `graceful_timeout` on release.
    #[must_use]
    pub fn new(process: SharedProcess, graceful_timeout: Duration) -> Self {
        Self {
            process,
            graceful_timeout,
            released: false,
        }
    }

    /// Returns the guarded process.
    #[must_use]
    pub fn process(&self) -> &SharedProcess {
        &self.process
    }

    /// Stops the process gracefully and disarms the guard.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping the process failed; the process is
    /// `Stopped` regardless.
    pub async fn release(mut self) -> Result<StopOutcome, ProcessError> {
        self.released = true;
        self.process.lock().await.stop(self.graceful_timeout).await
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.process.try_lock() {
            Ok(mut process) => process.force_kill(),
            Err(_) => warn!("process busy during guard drop; relying on kill-on-drop"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{ProcessCommand, ProcessState};
    use crate::testing::ScriptedHealthCheck;

    fn shared() -> SharedProcess {
        Arc::new(Mutex::new(ManagedProcess::new(
            "api",
            ProcessCommand::shell("sleep 30"),
            Arc::new(ScriptedHealthCheck::ready_on(1)),
        )))
    }

    #[tokio::test]
    async fn test_release_stops_gracefully() {
        let process = shared();
        process.lock().await.start().unwrap();

        let guard = ProcessGuard::new(process.clone(), Duration::from_secs(5));
        let outcome = guard.release().await.unwrap();

        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(process.lock().await.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_drop_without_release_kills() {
        let process = shared();
        process.lock().await.start().unwrap();

        {
            let _guard = ProcessGuard::new(process.clone(), Duration::from_secs(5));
        }

        let process = process.lock().await;
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_guard_fires_on_panic() {
        let process = shared();
        process.lock().await.start().unwrap();

        let inner = process.clone();
        let result = tokio::spawn(async move {
            let _guard = ProcessGuard::new(inner, Duration::from_secs(5));
            panic!("controller blew up");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(process.lock().await.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_release_after_stop_is_noop() {
        let process = shared();
        process.lock().await.start().unwrap();
        process.lock().await.stop(Duration::from_secs(5)).await.unwrap();

        let outcome = ProcessGuard::new(process, Duration::from_secs(5))
            .release()
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyStopped);
    }
}
