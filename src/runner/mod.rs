//! Service runners and scoped service acquisition.
//!
//! A [`ServiceRunner`] launches a service from a build location and a
//! provider directory, and hands back a [`ServiceHandle`] that can stop it.
//! [`run_scoped`] ties the two together so a service is always released,
//! whether the caller's block succeeds, fails or panics.

mod process;

pub use process::{ProcessHandle, ProcessRunner};

use std::future::Future;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::location::ServicePaths;

/// Snapshot of a live service, handed to the block run while it is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSession {
    /// Name of the runner that launched the service.
    pub runner: String,
    /// Service build location.
    pub service: PathBuf,
    /// Provider directory the service was launched with.
    pub provider_dir: PathBuf,
    /// Process id, when the service runs as a subprocess.
    pub pid: Option<u32>,
}

/// A launched service that can be stopped.
#[async_trait]
pub trait ServiceHandle: Send {
    /// Stops the service and waits for it to go away.
    ///
    /// Fails with [`Error::Teardown`](crate::Error::Teardown) if the service
    /// did not stop cleanly.
    async fn shutdown(&mut self) -> Result<()>;

    /// Best-effort immediate stop, used when the handle is dropped while live.
    fn abort(&mut self);

    /// Describes the live service.
    fn session(&self) -> ServiceSession;
}

/// Trait for anything that can launch a service.
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    /// The handle type returned for a live service.
    type Handle: ServiceHandle;

    /// Launches the service and returns once it is live.
    ///
    /// Fails with [`Error::Launch`](crate::Error::Launch) if it could not start.
    async fn launch(&self, paths: &ServicePaths) -> Result<Self::Handle>;

    /// Returns the name of this runner.
    fn name(&self) -> &str;
}

/// Owns a live service handle and guarantees it is released.
///
/// Call [`ServiceGuard::release`] for an orderly shutdown. If the guard is
/// dropped first (panic or cancellation), the handle is aborted.
pub struct ServiceGuard<H: ServiceHandle> {
    handle: H,
    released: bool,
}

impl<H: ServiceHandle> ServiceGuard<H> {
    /// Wraps a live handle.
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            released: false,
        }
    }

    /// Returns the guarded handle.
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Returns true once the service has been shut down.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Shuts the service down. Subsequent calls are no-ops.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        let result = self.handle.shutdown().await;
        self.released = true;
        result
    }
}

impl<H: ServiceHandle> Drop for ServiceGuard<H> {
    fn drop(&mut self) {
        if !self.released {
            let session = self.handle.session();
            tracing::warn!(
                runner = %session.runner,
                service = ?session.service,
                "service guard dropped while live, aborting service"
            );
            self.handle.abort();
        }
    }
}

/// Launches a service, runs `block` while it is live, then shuts it down.
///
/// Shutdown happens exactly once on every path. A launch failure is returned
/// as-is and the block never runs. A teardown failure fails the whole call
/// even when the block succeeded. When both the block and the teardown fail,
/// the block's error is returned and the teardown error is logged.
pub async fn run_scoped<R, F, Fut, T>(runner: &R, paths: &ServicePaths, block: F) -> Result<T>
where
    R: ServiceRunner + ?Sized,
    F: FnOnce(ServiceSession) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    tracing::info!(
        runner = %runner.name(),
        service = ?paths.service(),
        provider_dir = ?paths.provider_dir(),
        "launching service"
    );

    let handle = runner.launch(paths).await?;
    let mut guard = ServiceGuard::new(handle);

    tracing::info!(runner = %runner.name(), "service is live");

    let outcome = block(guard.handle().session()).await;
    let released = guard.release().await;

    match (outcome, released) {
        (Ok(value), Ok(())) => {
            tracing::info!(runner = %runner.name(), "service shut down cleanly");
            Ok(value)
        }
        (Ok(_), Err(teardown)) => Err(teardown),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            tracing::error!(
                error = %teardown,
                "service teardown also failed after block error"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmokeConfig;
    use crate::error::Error;
    use crate::location::configure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        shutdowns: AtomicUsize,
        aborts: AtomicUsize,
    }

    struct MockHandle {
        counters: Arc<Counters>,
        fail_shutdown: bool,
        service: PathBuf,
    }

    #[async_trait]
    impl ServiceHandle for MockHandle {
        async fn shutdown(&mut self) -> Result<()> {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(Error::Teardown {
                    service: self.service.clone(),
                    reason: "still running".to_string(),
                });
            }
            Ok(())
        }

        fn abort(&mut self) {
            self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        }

        fn session(&self) -> ServiceSession {
            ServiceSession {
                runner: "mock".to_string(),
                service: self.service.clone(),
                provider_dir: PathBuf::from("/providers"),
                pid: None,
            }
        }
    }

    #[derive(Default)]
    struct MockRunner {
        counters: Arc<Counters>,
        fail_launch: bool,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl ServiceRunner for MockRunner {
        type Handle = MockHandle;

        async fn launch(&self, paths: &ServicePaths) -> Result<MockHandle> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_launch {
                return Err(Error::Launch {
                    service: paths.service().to_path_buf(),
                    reason: "no such build".to_string(),
                });
            }
            Ok(MockHandle {
                counters: Arc::clone(&self.counters),
                fail_shutdown: self.fail_shutdown,
                service: paths.service().to_path_buf(),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn paths() -> ServicePaths {
        configure("/work/pubsub/unittest", &SmokeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn block_sees_live_session() {
        let runner = MockRunner::default();

        let service = run_scoped(&runner, &paths(), |session| async move {
            Ok(session.service)
        })
        .await
        .unwrap();

        assert_eq!(service, PathBuf::from("/work/pubsub/build/PubSub"));
        assert_eq!(runner.counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(runner.counters.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_happens_once_when_block_fails() {
        let runner = MockRunner::default();

        let result: Result<()> = run_scoped(&runner, &paths(), |_| async {
            Err(Error::Block("assertion failed".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Block(_))));
        assert_eq!(runner.counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(runner.counters.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn launch_failure_skips_block_and_release() {
        let runner = MockRunner {
            fail_launch: true,
            ..Default::default()
        };
        let ran = AtomicUsize::new(0);

        let result: Result<()> = run_scoped(&runner, &paths(), |_| async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_launch());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(runner.counters.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn teardown_failure_fails_successful_block() {
        let runner = MockRunner {
            fail_shutdown: true,
            ..Default::default()
        };

        let result = run_scoped(&runner, &paths(), |_| async { Ok(42) }).await;

        assert!(result.unwrap_err().is_teardown());
        assert_eq!(runner.counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn block_error_wins_over_teardown_error() {
        let runner = MockRunner {
            fail_shutdown: true,
            ..Default::default()
        };

        let result: Result<()> = run_scoped(&runner, &paths(), |_| async {
            Err(Error::Block("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Block(_))));
    }

    #[tokio::test]
    async fn guard_aborts_service_when_block_panics() {
        let counters = Arc::new(Counters::default());
        let runner = MockRunner {
            counters: Arc::clone(&counters),
            ..Default::default()
        };

        let task = tokio::spawn(async move {
            let _: Result<()> = run_scoped(&runner, &paths(), |_| async {
                let fail = true;
                if fail {
                    panic!("block panicked");
                }
                Ok(())
            })
            .await;
        });

        assert!(task.await.is_err());
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn guard_release_is_idempotent() {
        let runner = MockRunner::default();
        let handle = runner.launch(&paths()).await.unwrap();

        let mut guard = ServiceGuard::new(handle);
        guard.release().await.unwrap();
        guard.release().await.unwrap();
        assert!(guard.is_released());
        drop(guard);

        assert_eq!(runner.counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(runner.counters.aborts.load(Ordering::SeqCst), 0);
    }
}
