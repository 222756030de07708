//! Build modes and the profiles they resolve to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::artifact::ArtifactKind;
use crate::error::PipelineError;

/// The single axis of behavioural variation between pipeline runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Fast-iteration configuration used for testnets and e2e suites.
    Test,

    /// Optimized configuration used for releases.
    Production,
}

impl BuildMode {
    /// Parse the raw `production` input, which must be exactly `true` or `false`.
    pub fn from_production_input(production: &str) -> Result<Self, PipelineError> {
        match production.trim() {
            "true" => Ok(BuildMode::Production),
            "false" => Ok(BuildMode::Test),
            other => Err(PipelineError::Configuration(format!(
                "production must be 'true' or 'false', got '{other}'"
            ))),
        }
    }

    /// Artifact kinds compiled by the build stage, in build order.
    pub fn build_kinds(&self) -> Vec<ArtifactKind> {
        match self {
            BuildMode::Test => vec![ArtifactKind::Binary],
            BuildMode::Production => vec![ArtifactKind::Binary, ArtifactKind::RuntimeBlob],
        }
    }

    /// Whether the packaging stage turns the binary into an image.
    pub fn packages_image(&self) -> bool {
        self.is_production()
    }

    /// Every kind a run in this mode publishes on success.
    pub fn published_kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds = self.build_kinds();
        if self.packages_image() {
            kinds.push(ArtifactKind::Image);
        }
        kinds
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildMode::Test => "test",
            BuildMode::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, BuildMode::Production)
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(BuildMode::Test),
            "production" => Ok(BuildMode::Production),
            other => Err(PipelineError::Configuration(format!(
                "unknown build mode '{other}', expected 'test' or 'production'"
            ))),
        }
    }
}

/// Cargo profile a build is compiled with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationProfile {
    /// `--profile release`
    Release,

    /// `--profile production` (fat LTO, single codegen unit)
    Production,
}

impl OptimizationProfile {
    /// Name passed to `cargo --profile`, also the `target/` subdirectory.
    pub fn cargo_profile(&self) -> &'static str {
        match self {
            OptimizationProfile::Release => "release",
            OptimizationProfile::Production => "production",
        }
    }
}

impl std::fmt::Display for OptimizationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cargo_profile())
    }
}

/// Concrete compiler configuration derived from a [`BuildMode`].
///
/// Computed once per run by [`resolve`] and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BuildProfile {
    pub mode: BuildMode,
    pub optimization: OptimizationProfile,
    pub features: BTreeSet<String>,
    pub artifact_suffix: String,
}

impl BuildProfile {
    /// Features joined the way `cargo --features` expects them, if any.
    pub fn features_arg(&self) -> Option<String> {
        if self.features.is_empty() {
            None
        } else {
            Some(self.features.iter().cloned().collect::<Vec<_>>().join(","))
        }
    }
}

/// Features enabled for test-mode node builds.
pub const TEST_FEATURES: &[&str] = &["short_session", "enable_treasury_proposals"];

/// Resolve a build mode into its build profile.
pub fn resolve(mode: BuildMode) -> BuildProfile {
    match mode {
        BuildMode::Production => BuildProfile {
            mode,
            optimization: OptimizationProfile::Production,
            features: BTreeSet::new(),
            artifact_suffix: "production".to_string(),
        },
        BuildMode::Test => BuildProfile {
            mode,
            optimization: OptimizationProfile::Release,
            features: TEST_FEATURES.iter().map(|f| f.to_string()).collect(),
            artifact_suffix: "test".to_string(),
        },
    }
}
