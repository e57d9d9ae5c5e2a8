//! Subprocess service runner.
//!
//! Launches a host executable that loads the service build, waits for a
//! stdout line equal to the ready marker, and stops it by closing its stdin.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::config::{SmokeConfig, Validate, ValidationResult};
use crate::error::{Error, Result};
use crate::location::ServicePaths;

use super::{ServiceHandle, ServiceRunner, ServiceSession};

/// Number of stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for buffered stderr after the host has exited.
const STDERR_SETTLE: Duration = Duration::from_millis(500);

type OutputTail = Arc<Mutex<VecDeque<String>>>;

/// Runner that hosts the service in a child process.
///
/// The host is invoked as
/// `<host> [host args..] -providerPath <provider_dir> <service>`.
pub struct ProcessRunner {
    /// Host executable.
    host: PathBuf,
    /// Arguments placed before the provider and service arguments.
    host_args: Vec<OsString>,
    /// Stdout line (ignoring surrounding whitespace) that signals readiness.
    ready_marker: String,
    ready_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ProcessRunner {
    /// Creates a runner for the given host executable.
    pub fn new(host: impl Into<PathBuf>) -> Self {
        let config = SmokeConfig::default();
        Self {
            host: host.into(),
            host_args: Vec::new(),
            ready_marker: "ready".to_string(),
            ready_timeout: config.ready_timeout_duration(),
            shutdown_timeout: config.shutdown_timeout_duration(),
        }
    }

    /// Adds arguments passed to the host ahead of the standard ones.
    pub fn with_host_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.host_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the readiness marker. It must match a whole stdout line.
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    /// Sets the readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Takes both timeouts from a harness configuration.
    pub fn with_timeouts_from(self, config: &SmokeConfig) -> Self {
        self.with_ready_timeout(config.ready_timeout_duration())
            .with_shutdown_timeout(config.shutdown_timeout_duration())
    }

    /// Returns the host executable.
    pub fn host(&self) -> &Path {
        &self.host
    }

    /// Builds the host command line for the given paths.
    fn build_args(&self, paths: &ServicePaths) -> Vec<OsString> {
        let mut args = self.host_args.clone();
        args.push("-providerPath".into());
        args.push(paths.provider_dir().as_os_str().to_owned());
        args.push(paths.service().as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl ServiceRunner for ProcessRunner {
    type Handle = ProcessHandle;

    async fn launch(&self, paths: &ServicePaths) -> Result<ProcessHandle> {
        let service = paths.service().to_path_buf();
        let launch_error = |reason: String| Error::Launch {
            service: service.clone(),
            reason,
        };

        if self.ready_marker.trim().is_empty() {
            return Err(launch_error("ready marker is empty".to_string()));
        }

        if !service.exists() {
            return Err(launch_error("service build not found".to_string()));
        }

        tracing::info!(
            host = ?self.host,
            service = ?service,
            provider_dir = ?paths.provider_dir(),
            "spawning service host"
        );

        let mut child = Command::new(&self.host)
            .args(self.build_args(paths))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                launch_error(format!(
                    "failed to spawn host {}: {}",
                    self.host.display(),
                    e
                ))
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(launch_error("host stdio was not captured".to_string()));
        };

        let stderr_tail: OutputTail = Arc::new(Mutex::new(VecDeque::new()));
        let mut stderr_drain = Some(drain_lines(
            stderr,
            "service stderr",
            Some(Arc::clone(&stderr_tail)),
        ));

        let mut stdout_lines = BufReader::new(stdout).lines();
        let marker = self.ready_marker.trim();

        let wait_ready = async {
            loop {
                match stdout_lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::debug!(line = %line, "service stdout");
                        if line.trim() == marker {
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        return Err("host closed stdout before reporting ready".to_string());
                    }
                    Err(e) => return Err(format!("failed to read host output: {}", e)),
                }
            }
        };

        match tokio::time::timeout(self.ready_timeout, wait_ready).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                // A host blocked on stdin would otherwise sit out the timeout
                drop(stdin);
                let exited = tokio::time::timeout(self.shutdown_timeout, child.wait()).await;
                let status = match exited {
                    Ok(Ok(status)) => status.to_string(),
                    _ => {
                        let _ = child.kill().await;
                        "killed".to_string()
                    }
                };
                settle(&mut stderr_drain).await;
                return Err(launch_error(format!(
                    "{} ({}){}",
                    reason,
                    status,
                    format_tail(&stderr_tail)
                )));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill unresponsive service host");
                }
                settle(&mut stderr_drain).await;
                return Err(launch_error(format!(
                    "service did not report ready within {:?}{}",
                    self.ready_timeout,
                    format_tail(&stderr_tail)
                )));
            }
        }

        drain_lines(stdout_lines.into_inner(), "service stdout", None);

        let session = ServiceSession {
            runner: self.name().to_string(),
            service,
            provider_dir: paths.provider_dir().to_path_buf(),
            pid: child.id(),
        };

        tracing::info!(pid = ?session.pid, "service host reported ready");

        Ok(ProcessHandle {
            child,
            stdin: Some(stdin),
            session,
            shutdown_timeout: self.shutdown_timeout,
            stderr_tail,
            stderr_drain,
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// A service running in a child process.
pub struct ProcessHandle {
    child: Child,
    /// Closing stdin asks the host to stop.
    stdin: Option<ChildStdin>,
    session: ServiceSession,
    shutdown_timeout: Duration,
    stderr_tail: OutputTail,
    stderr_drain: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    fn teardown_error(&self, reason: String) -> Error {
        Error::Teardown {
            service: self.session.service.clone(),
            reason,
        }
    }
}

#[async_trait]
impl ServiceHandle for ProcessHandle {
    async fn shutdown(&mut self) -> Result<()> {
        drop(self.stdin.take());

        let exited = tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await;

        match exited {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(pid = ?self.session.pid, "service host exited");
                Ok(())
            }
            Ok(Ok(status)) => {
                settle(&mut self.stderr_drain).await;
                Err(self.teardown_error(format!(
                    "host exited with {}{}",
                    status,
                    format_tail(&self.stderr_tail)
                )))
            }
            Ok(Err(e)) => Err(self.teardown_error(format!("failed to wait for host: {}", e))),
            Err(_) => {
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(error = %e, "failed to kill service host");
                }
                Err(self.teardown_error(format!(
                    "host did not exit within {:?}",
                    self.shutdown_timeout
                )))
            }
        }
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "service host already gone");
        }
    }

    fn session(&self) -> ServiceSession {
        self.session.clone()
    }
}

/// Forwards each line of `reader` to debug logs, optionally keeping a tail.
fn drain_lines<R>(reader: R, stream: &'static str, tail: Option<OutputTail>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(line = %line, "{}", stream);
            if let Some(tail) = &tail {
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }
    })
}

/// Waits briefly for a drain task to reach end of stream.
async fn settle(drain: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = drain.take() {
        if tokio::time::timeout(STDERR_SETTLE, handle).await.is_err() {
            tracing::debug!("stderr still open after host exit");
        }
    }
}

fn format_tail(tail: &OutputTail) -> String {
    match tail.lock() {
        Ok(tail) if !tail.is_empty() => {
            format!("; stderr: {}", tail.iter().cloned().collect::<Vec<_>>().join(" | "))
        }
        _ => String::new(),
    }
}

impl Validate for ProcessRunner {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.ready_marker.trim().is_empty() {
            result.add_error("ready marker cannot be empty");
        }

        if self.ready_timeout.is_zero() {
            result.add_error("ready timeout must be greater than zero");
        }

        if self.shutdown_timeout.is_zero() {
            result.add_error("shutdown timeout must be greater than zero");
        }

        result
    }
}
