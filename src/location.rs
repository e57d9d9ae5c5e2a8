//! Resolution of the service build location and provider directory.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::SmokeConfig;
use crate::error::Result;

/// Resolved locations handed to a service runner.
///
/// Both paths are absolute and lexically normalized. Neither is checked for
/// existence here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePaths {
    service: PathBuf,
    provider_dir: PathBuf,
}

impl ServicePaths {
    /// Returns the service build location.
    pub fn service(&self) -> &Path {
        &self.service
    }

    /// Returns the provider fixture directory.
    pub fn provider_dir(&self) -> &Path {
        &self.provider_dir
    }
}

/// Resolves the service location and provider directory for a test root.
///
/// The service lives at `<test_root>/../<build_subdir>` and the providers at
/// `<test_root>/providerDir`. A relative `test_root` is taken from the
/// current directory.
pub fn configure(test_root: impl AsRef<Path>, config: &SmokeConfig) -> Result<ServicePaths> {
    let root = absolute(test_root.as_ref())?;

    let service = normalize(&root.join("..").join(&config.build_subdir));
    let provider_dir = normalize(&root.join(&config.provider_dir_name));

    tracing::debug!(
        service = ?service,
        provider_dir = ?provider_dir,
        "resolved service paths"
    );

    Ok(ServicePaths {
        service,
        provider_dir,
    })
}

/// Returns the directory containing `file`, used as a test root.
pub fn test_root_of(file: impl AsRef<Path>) -> Result<PathBuf> {
    let file = absolute(file.as_ref())?;
    Ok(file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.clone()))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Normalizes `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_location_is_sibling_build_dir() {
        let paths = configure("/work/pubsub/unittest", &SmokeConfig::default()).unwrap();

        assert_eq!(paths.service(), Path::new("/work/pubsub/build/PubSub"));
        assert_eq!(
            paths.provider_dir(),
            Path::new("/work/pubsub/unittest/providerDir")
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let config = SmokeConfig::default();
        let first = configure("/work/pubsub/unittest", &config).unwrap();
        let second = configure("/work/pubsub/unittest", &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn override_changes_only_service_location() {
        let config = SmokeConfig::default().with_output_dir_override(Some("custom/path".into()));
        let paths = configure("/work/pubsub/unittest", &config).unwrap();

        assert_eq!(paths.service(), Path::new("/work/pubsub/custom/path"));
        assert_eq!(
            paths.provider_dir(),
            Path::new("/work/pubsub/unittest/providerDir")
        );
    }

    #[test]
    fn override_may_climb_out_of_parent() {
        let config = SmokeConfig::new("../elsewhere/./PubSub");
        let paths = configure("/work/pubsub/unittest", &config).unwrap();
        assert_eq!(paths.service(), Path::new("/work/elsewhere/PubSub"));
    }

    #[test]
    fn relative_test_root_becomes_absolute() {
        let paths = configure("unittest", &SmokeConfig::default()).unwrap();

        assert!(paths.service().is_absolute());
        assert!(paths.provider_dir().is_absolute());
        assert!(paths.service().ends_with("build/PubSub"));
        assert!(paths.provider_dir().ends_with("unittest/providerDir"));
    }

    #[test]
    fn nonexistent_root_is_not_an_error() {
        let paths = configure("/does/not/exist/unittest", &SmokeConfig::default());
        assert!(paths.is_ok());
    }

    #[test]
    fn test_root_is_parent_of_file() {
        let root = test_root_of("/work/pubsub/unittest/smoke.rs").unwrap();
        assert_eq!(root, PathBuf::from("/work/pubsub/unittest"));
    }

    #[test]
    fn normalize_keeps_root_on_excess_parent_dirs() {
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
    }
}
