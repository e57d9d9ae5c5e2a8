//! Harness configuration.
//!
//! The build output subdirectory is an explicit value rather than a global
//! lookup. The only environment read happens in [`SmokeConfig::with_env_override`],
//! which entry points call once at startup.
//!
//! Environment variables:
//! - `BP_OUTPUT_DIR` - replaces the default `build/PubSub` subdirectory

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable that overrides the build output subdirectory.
pub const OUTPUT_DIR_ENV: &str = "BP_OUTPUT_DIR";

/// Default build output subdirectory, relative to the test root's parent.
pub const DEFAULT_BUILD_SUBDIR: &str = "build/PubSub";

/// Name of the provider fixture directory under the test root.
pub const PROVIDER_DIR_NAME: &str = "providerDir";

/// Configuration for a smoke-test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeConfig {
    /// Subdirectory (relative to `<test-root>/..`) holding the service build.
    #[serde(default = "default_build_subdir")]
    pub build_subdir: String,

    /// Provider fixture directory name under the test root.
    #[serde(default = "default_provider_dir_name")]
    pub provider_dir_name: String,

    /// Seconds to wait for the service to report readiness.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: u64,

    /// Seconds to wait for the service to exit after shutdown is requested.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_build_subdir() -> String {
    DEFAULT_BUILD_SUBDIR.to_string()
}

fn default_provider_dir_name() -> String {
    PROVIDER_DIR_NAME.to_string()
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            build_subdir: default_build_subdir(),
            provider_dir_name: default_provider_dir_name(),
            ready_timeout: default_ready_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl SmokeConfig {
    /// Creates a configuration with the given build subdirectory.
    pub fn new(build_subdir: impl Into<String>) -> Self {
        Self {
            build_subdir: build_subdir.into(),
            ..Self::default()
        }
    }

    /// Loads the default configuration with `BP_OUTPUT_DIR` applied.
    pub fn from_env() -> Self {
        Self::default().with_env_override()
    }

    /// Applies `BP_OUTPUT_DIR` when it is set, even to an empty value.
    pub fn with_env_override(self) -> Self {
        self.with_output_dir_override(std::env::var(OUTPUT_DIR_ENV).ok())
    }

    /// Loads a configuration from a TOML file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Replaces the build subdirectory when an override is present.
    ///
    /// An empty override is applied as-is; [`Validate`] rejects it.
    pub fn with_output_dir_override(mut self, value: Option<String>) -> Self {
        if let Some(subdir) = value {
            self.build_subdir = subdir;
        }
        self
    }

    /// Sets the readiness timeout in seconds.
    pub fn with_ready_timeout(mut self, secs: u64) -> Self {
        self.ready_timeout = secs;
        self
    }

    /// Sets the shutdown timeout in seconds.
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout = secs;
        self
    }

    /// Returns the readiness timeout as a Duration.
    pub fn ready_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }

    /// Returns the shutdown timeout as a Duration.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Problems found in a harness configuration before anything is launched.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Problems that stop the smoke run.
    pub errors: Vec<String>,
    /// Suspicious settings that are still runnable.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True when the configuration can be used for a smoke run.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records a problem that stops the run.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Records a setting worth a log line.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Folds another set of findings into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Returns the warnings, or every error joined into one
    /// [`Error::Config`].
    pub fn into_result(self) -> Result<Vec<String>> {
        if !self.is_valid() {
            return Err(Error::Config(format!(
                "invalid smoke configuration: {}",
                self.errors.join("; ")
            )));
        }
        Ok(self.warnings)
    }
}

/// Checked before a service is launched.
pub trait Validate {
    /// Collects every problem instead of stopping at the first.
    fn validate(&self) -> ValidationResult;
}

impl Validate for SmokeConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.build_subdir.trim().is_empty() {
            result.add_error("build_subdir cannot be empty");
        } else if Path::new(&self.build_subdir).is_absolute() {
            result.add_error(format!(
                "build_subdir '{}' must be relative to the test root's parent",
                self.build_subdir
            ));
        }

        // The provider directory location is fixed
        if self.provider_dir_name != PROVIDER_DIR_NAME {
            result.add_error(format!(
                "provider_dir_name must be '{}', got '{}'",
                PROVIDER_DIR_NAME, self.provider_dir_name
            ));
        }

        if self.ready_timeout == 0 {
            result.add_error("ready_timeout must be greater than zero");
        }

        if self.shutdown_timeout == 0 {
            result.add_error("shutdown_timeout must be greater than zero");
        }

        if self.ready_timeout > 600 {
            result.add_warning("ready_timeout over 10 minutes may hide a hung service");
        }

        result
    }
}
