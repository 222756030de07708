//! Artifact kinds, descriptors and the naming service.
//!
//! Names are the addressing key for publication and for downstream jobs that
//! fetch artifacts, so [`artifact_name`] must stay injective over every
//! `(kind, mode)` pair the pipeline produces.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mode::BuildProfile;

/// Product prefix shared by binary and image artifact names.
pub const PRODUCT: &str = "aleph-node";

/// Fixed name of the runtime blob artifact. Only production builds produce it.
pub const RUNTIME_ARTIFACT_NAME: &str = "aleph-production-runtime";

/// Retention applied to every published artifact.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Location of the node binary inside the container image.
pub const IMAGE_INSTALL_PATH: &str = "/usr/local/bin/aleph-node";

/// Kinds of artifact a run can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The `aleph-node` executable.
    Binary,

    /// The compiled web-assembly runtime consumed by the node.
    RuntimeBlob,

    /// A container image wrapping the binary, saved as an archive.
    Image,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Binary,
        ArtifactKind::RuntimeBlob,
        ArtifactKind::Image,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Binary => "binary",
            ArtifactKind::RuntimeBlob => "runtime",
            ArtifactKind::Image => "image",
        }
    }

    /// Key under which the published name is exposed to callers.
    pub fn output_key(&self) -> &'static str {
        match self {
            ArtifactKind::Binary => "artifact-name-binary",
            ArtifactKind::Image => "artifact-name-image",
            ArtifactKind::RuntimeBlob => "aleph-runtime-artifact-name",
        }
    }

    /// Cargo package that compiles this kind. Images are not compiled.
    pub fn cargo_package(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::Binary => Some("aleph-node"),
            ArtifactKind::RuntimeBlob => Some("aleph-runtime"),
            ArtifactKind::Image => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable artifact name for `kind` built with `profile`.
///
/// `aleph-node-<suffix>` for binaries, `aleph-node-image-<suffix>` for images,
/// and the fixed [`RUNTIME_ARTIFACT_NAME`] for runtime blobs.
pub fn artifact_name(kind: ArtifactKind, profile: &BuildProfile) -> String {
    match kind {
        ArtifactKind::Binary => format!("{PRODUCT}-{}", profile.artifact_suffix),
        ArtifactKind::Image => format!("{PRODUCT}-image-{}", profile.artifact_suffix),
        ArtifactKind::RuntimeBlob => RUNTIME_ARTIFACT_NAME.to_string(),
    }
}

/// Path, relative to the checkout, where `kind` lands after it is produced.
pub fn relative_output_path(kind: ArtifactKind, profile: &BuildProfile) -> PathBuf {
    let target = Path::new("target").join(profile.optimization.cargo_profile());
    match kind {
        ArtifactKind::Binary => target.join(PRODUCT),
        ArtifactKind::RuntimeBlob => target
            .join("wbuild")
            .join("aleph-runtime")
            .join("aleph_runtime.compact.compressed.wasm"),
        ArtifactKind::Image => target.join(format!("{PRODUCT}-image.tar")),
    }
}

/// Absolute output path of `kind` inside `checkout`.
pub fn output_path(kind: ArtifactKind, profile: &BuildProfile, checkout: &Path) -> PathBuf {
    checkout.join(relative_output_path(kind, profile))
}

/// A named, produced artifact ready for publication. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub name: String,
    pub path: PathBuf,
    pub retention_days: u32,
}

impl ArtifactDescriptor {
    /// Describe a produced file, deriving its name from `(kind, profile)`.
    pub fn new(
        kind: ArtifactKind,
        profile: &BuildProfile,
        path: PathBuf,
        retention_days: u32,
    ) -> Self {
        Self {
            kind,
            name: artifact_name(kind, profile),
            path,
            retention_days,
        }
    }
}
