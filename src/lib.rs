//! Service Smoke - lifecycle smoke tests for packaged services
//!
//! This library resolves where a service build and its provider fixtures live,
//! launches the service through a [`ServiceRunner`], and guarantees the service
//! is shut down again on every exit path.

pub mod config;
pub mod error;
pub mod location;
pub mod runner;
pub mod smoke;

pub use config::{
    SmokeConfig, Validate, ValidationResult, DEFAULT_BUILD_SUBDIR, OUTPUT_DIR_ENV,
    PROVIDER_DIR_NAME,
};
pub use error::{Error, Result};
pub use location::{configure, test_root_of, ServicePaths};
pub use runner::{
    run_scoped, ProcessHandle, ProcessRunner, ServiceGuard, ServiceHandle, ServiceRunner,
    ServiceSession,
};
pub use smoke::{SmokeReport, SmokeState, SmokeTest};
