//! Smoke test for a packaged service.
//!
//! A [`SmokeTest`] is configured once, run once, and torn down. Running it
//! launches the service, does nothing while it is live, and shuts it down;
//! a clean launch and a clean shutdown are the whole assertion.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SmokeConfig;
use crate::error::{Error, Result};
use crate::location::{configure, ServicePaths};
use crate::runner::{run_scoped, ServiceRunner, ServiceSession};

/// Lifecycle of a single smoke test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmokeState {
    /// Paths are resolved, nothing has run yet.
    Configured,
    /// The service launched and shut down cleanly.
    Ran,
    /// Launch, the block, or teardown failed.
    Failed,
}

/// Outcome of a smoke run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeReport {
    /// Unique identifier for this run.
    pub run_id: String,
    /// Final state.
    pub state: SmokeState,
    /// Name of the runner used.
    pub runner: String,
    /// Service build location.
    pub service: PathBuf,
    /// Provider directory.
    pub provider_dir: PathBuf,
    /// Wall-clock time from launch to release.
    pub duration: Duration,
    /// Error message, if the run failed.
    pub error: Option<String>,
}

/// A configured smoke test for one service build.
#[derive(Debug)]
pub struct SmokeTest {
    paths: ServicePaths,
    state: SmokeState,
    report: Option<SmokeReport>,
}

impl SmokeTest {
    /// Resolves the service and provider paths for `test_root`.
    pub fn configure(test_root: impl AsRef<Path>, config: &SmokeConfig) -> Result<Self> {
        let paths = configure(test_root, config)?;
        Ok(Self::from_paths(paths))
    }

    /// Creates a smoke test from already resolved paths.
    pub fn from_paths(paths: ServicePaths) -> Self {
        Self {
            paths,
            state: SmokeState::Configured,
            report: None,
        }
    }

    /// Returns the resolved paths.
    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SmokeState {
        self.state
    }

    /// Returns the report of the last run, if any.
    pub fn report(&self) -> Option<&SmokeReport> {
        self.report.as_ref()
    }

    /// Loads the service and shuts it down again.
    ///
    /// Any launch or teardown error is returned unchanged and leaves the
    /// test in [`SmokeState::Failed`].
    pub async fn test_load_service<R>(&mut self, runner: &R) -> Result<SmokeReport>
    where
        R: ServiceRunner + ?Sized,
    {
        self.run_with(runner, |_session| async { Ok(()) }).await?;
        self.report
            .clone()
            .ok_or_else(|| Error::Config("smoke run produced no report".to_string()))
    }

    /// Runs `block` against the live service with the same lifecycle as
    /// [`SmokeTest::test_load_service`].
    pub async fn run_with<R, F, Fut, T>(&mut self, runner: &R, block: F) -> Result<T>
    where
        R: ServiceRunner + ?Sized,
        F: FnOnce(ServiceSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.state != SmokeState::Configured {
            return Err(Error::Config(format!(
                "smoke test already ran (state: {:?})",
                self.state
            )));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let start_time = Instant::now();

        let outcome = run_scoped(runner, &self.paths, block).await;

        self.state = if outcome.is_ok() {
            SmokeState::Ran
        } else {
            SmokeState::Failed
        };

        let report = SmokeReport {
            run_id,
            state: self.state,
            runner: runner.name().to_string(),
            service: self.paths.service().to_path_buf(),
            provider_dir: self.paths.provider_dir().to_path_buf(),
            duration: start_time.elapsed(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };

        match &report.error {
            None => tracing::info!(
                run_id = %report.run_id,
                duration = ?report.duration,
                "smoke test passed"
            ),
            Some(error) => tracing::error!(
                run_id = %report.run_id,
                error = %error,
                "smoke test failed"
            ),
        }

        self.report = Some(report);
        outcome
    }

    /// Per-test cleanup. Nothing to do: the service is released by the run.
    pub fn teardown(&mut self) {
        tracing::debug!(state = ?self.state, "smoke test teardown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_starts_in_configured_state() {
        let test = SmokeTest::configure("/work/pubsub/unittest", &SmokeConfig::default()).unwrap();

        assert_eq!(test.state(), SmokeState::Configured);
        assert!(test.report().is_none());
        assert_eq!(
            test.paths().service(),
            Path::new("/work/pubsub/build/PubSub")
        );
    }

    #[test]
    fn smoke_state_serializes_to_lowercase() {
        assert_eq!(
            serde_json::to_string(&SmokeState::Configured).unwrap(),
            "\"configured\""
        );
        assert_eq!(serde_json::to_string(&SmokeState::Ran).unwrap(), "\"ran\"");
        assert_eq!(
            serde_json::to_string(&SmokeState::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn teardown_leaves_state_alone() {
        let mut test =
            SmokeTest::configure("/work/pubsub/unittest", &SmokeConfig::default()).unwrap();
        test.teardown();
        assert_eq!(test.state(), SmokeState::Configured);
    }
}
