//! Build requests and their deterministic identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::ArtifactKind;
use crate::error::{PipelineError, Result};
use crate::mode::BuildMode;

/// Input of one pipeline run. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BuildRequest {
    /// Exact source snapshot (commit SHA, tag or branch) to build.
    #[serde(rename = "ref")]
    pub git_ref: String,

    pub mode: BuildMode,
}

impl BuildRequest {
    /// Create a request, rejecting an empty or whitespace-only ref.
    pub fn new(git_ref: impl Into<String>, mode: BuildMode) -> Result<Self> {
        let git_ref = git_ref.into();
        if git_ref.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "ref must be a non-empty source identifier".to_string(),
            ));
        }
        Ok(Self { git_ref, mode })
    }

    /// Build a request from the raw `ref` / `production` pipeline inputs.
    ///
    /// `production` must be exactly `true` or `false`.
    pub fn from_inputs(git_ref: &str, production: &str) -> Result<Self> {
        Self::new(git_ref, BuildMode::from_production_input(production)?)
    }

    /// Artifact kinds compiled by the build stage, in build order.
    pub fn build_kinds(&self) -> Vec<ArtifactKind> {
        self.mode.build_kinds()
    }

    /// Whether the packaging stage turns the binary into an image.
    pub fn packages_image(&self) -> bool {
        self.mode.packages_image()
    }

    /// Every kind the run publishes on success.
    pub fn published_kinds(&self) -> Vec<ArtifactKind> {
        self.mode.published_kinds()
    }

    /// Deterministic SHA-256 over `(ref, mode)`.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.git_ref.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.mode.name().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Short digest (first 12 chars)
    pub fn short_digest(&self) -> String {
        self.digest()[..12].to_string()
    }
}
