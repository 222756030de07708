//! Pipeline configuration, read once at the process boundary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use aleph_ci_domain::DEFAULT_RETENTION_DAYS;

use crate::toolchain::ToolchainSpec;

pub const DEFAULT_TOOLCHAIN: &str = "stable";
pub const DEFAULT_ENGINE: &str = "docker";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "aleph-node";
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3 * 60 * 60;
pub const DEFAULT_TOOLCHAIN_TIMEOUT_SECS: u64 = 20 * 60;
pub const DEFAULT_PACKAGE_TIMEOUT_SECS: u64 = 30 * 60;

/// Everything a run needs that is not part of the [`BuildRequest`].
///
/// [`BuildRequest`]: aleph_ci_domain::BuildRequest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Source checkout the builds run in.
    pub checkout: PathBuf,
    /// Root of the filesystem artifact store.
    pub store_root: PathBuf,
    /// Shared compilation cache root; no caching when unset.
    pub cache_root: Option<PathBuf>,
    pub toolchain_channel: String,
    pub toolchain_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub package_timeout_secs: u64,
    /// Docker-compatible engine executable.
    pub container_engine: String,
    /// Image repository; each run tags its image `<repository>:<digest>-<run_id>`.
    pub image_repository: String,
    pub retention_days: u32,
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            checkout: std::env::var("ALEPH_CI_CHECKOUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            store_root: std::env::var("ALEPH_CI_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".aleph-ci/store")),
            cache_root: std::env::var("ALEPH_CI_CACHE").ok().map(PathBuf::from),
            toolchain_channel: std::env::var("ALEPH_CI_TOOLCHAIN")
                .unwrap_or_else(|_| DEFAULT_TOOLCHAIN.to_string()),
            toolchain_timeout_secs: env_secs(
                "ALEPH_CI_TOOLCHAIN_TIMEOUT",
                DEFAULT_TOOLCHAIN_TIMEOUT_SECS,
            ),
            build_timeout_secs: env_secs("ALEPH_CI_BUILD_TIMEOUT", DEFAULT_BUILD_TIMEOUT_SECS),
            package_timeout_secs: env_secs(
                "ALEPH_CI_PACKAGE_TIMEOUT",
                DEFAULT_PACKAGE_TIMEOUT_SECS,
            ),
            container_engine: std::env::var("ALEPH_CI_CONTAINER_ENGINE")
                .unwrap_or_else(|_| DEFAULT_ENGINE.to_string()),
            image_repository: std::env::var("ALEPH_CI_IMAGE_REPOSITORY")
                .unwrap_or_else(|_| DEFAULT_IMAGE_REPOSITORY.to_string()),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl PipelineConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Config for explicit paths, ignoring the environment.
    pub fn new(checkout: impl Into<PathBuf>, store_root: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            checkout: checkout.into(),
            store_root: store_root.into(),
            cache_root: None,
            toolchain_channel: DEFAULT_TOOLCHAIN.to_string(),
            toolchain_timeout_secs: DEFAULT_TOOLCHAIN_TIMEOUT_SECS,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            package_timeout_secs: DEFAULT_PACKAGE_TIMEOUT_SECS,
            container_engine: DEFAULT_ENGINE.to_string(),
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_cache(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    pub fn with_toolchain(mut self, channel: &str) -> Self {
        self.toolchain_channel = channel.to_string();
        self
    }

    pub fn with_container_engine(mut self, engine: &str) -> Self {
        self.container_engine = engine.to_string();
        self
    }

    pub fn with_image_repository(mut self, repository: &str) -> Self {
        self.image_repository = repository.to_string();
        self
    }

    pub fn with_build_timeout(mut self, secs: u64) -> Self {
        self.build_timeout_secs = secs;
        self
    }

    /// Toolchain to acquire before building.
    pub fn toolchain_spec(&self) -> ToolchainSpec {
        ToolchainSpec::new(&self.toolchain_channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::WASM_TARGET;

    #[test]
    fn test_new_uses_fixed_defaults() {
        let config = PipelineConfig::new("/src", "/store");
        assert_eq!(config.checkout, PathBuf::from("/src"));
        assert_eq!(config.retention_days, 7);
        assert!(config.cache_root.is_none());
        assert_eq!(config.container_engine, "docker");
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new("/src", "/store")
            .with_cache("/cache")
            .with_toolchain("nightly-2023-01-10")
            .with_container_engine("podman")
            .with_image_repository("registry.local/aleph-node")
            .with_build_timeout(60);
        assert_eq!(config.cache_root, Some(PathBuf::from("/cache")));
        assert_eq!(config.build_timeout_secs, 60);
        assert_eq!(config.image_repository, "registry.local/aleph-node");
        let spec = config.toolchain_spec();
        assert_eq!(spec.channel, "nightly-2023-01-10");
        assert!(spec.targets.iter().any(|t| t == WASM_TARGET));
    }

    #[test]
    fn test_env_secs_falls_back_on_garbage() {
        assert_eq!(env_secs("ALEPH_CI_TEST_UNSET_TIMEOUT_VAR", 42), 42);
    }
}
