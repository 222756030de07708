//! Stage definitions: the external commands a run invokes.

use aleph_ci_domain::{ArtifactKind, BuildProfile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a single external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory; inherits the current one when unset.
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a custom stage configuration.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            timeout_secs,
        }
    }

    /// `cargo +<channel> build` for a compiled artifact kind.
    ///
    /// Returns `None` for [`ArtifactKind::Image`], which is packaged rather
    /// than compiled.
    pub fn cargo_build(
        kind: ArtifactKind,
        profile: &BuildProfile,
        channel: &str,
        timeout_secs: u64,
    ) -> Option<Self> {
        let package = kind.cargo_package()?;
        let mut command = vec![
            "cargo".to_string(),
            format!("+{channel}"),
            "build".to_string(),
            "--locked".to_string(),
            "--profile".to_string(),
            profile.optimization.cargo_profile().to_string(),
            "-p".to_string(),
            package.to_string(),
        ];
        // Feature flags only apply to the node; the runtime is built as-is.
        if kind == ArtifactKind::Binary {
            if let Some(features) = profile.features_arg() {
                command.push("--features".to_string());
                command.push(features);
            }
        }
        Some(Self::custom(format!("build_{}", kind.name()), command, timeout_secs))
    }

    /// `<engine> build -t <tag> <context>`
    pub fn image_build(engine: &str, tag: &str, context: &Path, timeout_secs: u64) -> Self {
        Self::custom(
            "image_build",
            vec![
                engine.to_string(),
                "build".to_string(),
                "--tag".to_string(),
                tag.to_string(),
                context.to_string_lossy().to_string(),
            ],
            timeout_secs,
        )
    }

    /// `<engine> save -o <archive> <tag>`
    pub fn image_save(engine: &str, tag: &str, archive: &Path, timeout_secs: u64) -> Self {
        Self::custom(
            "image_save",
            vec![
                engine.to_string(),
                "save".to_string(),
                "--output".to_string(),
                archive.to_string_lossy().to_string(),
                tag.to_string(),
            ],
            timeout_secs,
        )
    }

    /// `<engine> rmi <tag>`
    pub fn image_remove(engine: &str, tag: &str, timeout_secs: u64) -> Self {
        Self::custom(
            "image_remove",
            vec![engine.to_string(), "rmi".to_string(), tag.to_string()],
            timeout_secs,
        )
    }

    /// Run the command inside `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aleph_ci_domain::{resolve, BuildMode};

    #[test]
    fn test_cargo_build_test_binary() {
        let profile = resolve(BuildMode::Test);
        let config = StageConfig::cargo_build(ArtifactKind::Binary, &profile, "nightly", 60)
            .expect("binary is compiled");
        assert_eq!(config.name, "build_binary");
        assert_eq!(config.command[0], "cargo");
        assert_eq!(config.command[1], "+nightly");
        assert!(config.command.windows(2).any(|w| w == ["--profile", "release"]));
        assert!(config.command.windows(2).any(|w| w == ["-p", "aleph-node"]));
        assert!(config.command.contains(&"--features".to_string()));
    }

    #[test]
    fn test_cargo_build_production_runtime() {
        let profile = resolve(BuildMode::Production);
        let config = StageConfig::cargo_build(ArtifactKind::RuntimeBlob, &profile, "stable", 60)
            .expect("runtime is compiled");
        assert!(config.command.windows(2).any(|w| w == ["--profile", "production"]));
        assert!(config.command.windows(2).any(|w| w == ["-p", "aleph-runtime"]));
        assert!(!config.command.contains(&"--features".to_string()));
    }

    #[test]
    fn test_image_is_not_compiled() {
        let profile = resolve(BuildMode::Production);
        assert!(StageConfig::cargo_build(ArtifactKind::Image, &profile, "stable", 60).is_none());
    }

    #[test]
    fn test_image_commands() {
        let build = StageConfig::image_build("docker", "aleph-node:abc", Path::new("/ctx"), 30);
        assert_eq!(build.command, ["docker", "build", "--tag", "aleph-node:abc", "/ctx"]);

        let save = StageConfig::image_save("podman", "aleph-node:abc", Path::new("/o.tar"), 30);
        assert_eq!(save.command[0], "podman");
        assert_eq!(save.command.last().unwrap(), "aleph-node:abc");

        let remove = StageConfig::image_remove("docker", "aleph-node:abc", 30);
        assert_eq!(remove.command, ["docker", "rmi", "aleph-node:abc"]);
    }

    #[test]
    fn test_stage_config_in_dir() {
        let config = StageConfig::custom("my_stage", vec!["echo".to_string()], 60);
        assert_eq!(config.working_dir, None);
        let config = config.in_dir("/tmp");
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }
}
