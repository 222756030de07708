//! In-memory fakes for the pipeline's collaborators (testing only)
//!
//! Each fake records its calls so tests can assert on what the orchestrator
//! invoked, and can be configured to fail at a chosen point.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use aleph_ci_domain::{output_path, ArtifactKind, BuildProfile, PipelineError};

use crate::cancel::CancelSignal;
use crate::executor::{require_output, BuildContext, BuildExecutor};
use crate::packaging::{image_archive_path, require_executable, ImagePackager};
use crate::toolchain::{Toolchain, ToolchainProvider, ToolchainSpec};

async fn write_executable(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeToolchain {
    fail_with: Option<String>,
    requested: Mutex<Vec<ToolchainSpec>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every acquisition fails with `message`.
    pub fn unavailable(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn requested(&self) -> Vec<ToolchainSpec> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolchainProvider for FakeToolchain {
    async fn acquire(
        &self,
        spec: &ToolchainSpec,
        _cancel: &CancelSignal,
    ) -> Result<Toolchain, PipelineError> {
        self.requested.lock().unwrap().push(spec.clone());
        match &self.fail_with {
            Some(message) => Err(PipelineError::Toolchain {
                channel: spec.channel.clone(),
                message: message.clone(),
            }),
            None => Ok(Toolchain::new(&spec.channel)),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeBuildExecutor
// ---------------------------------------------------------------------------

/// Writes a small executable file at the real output path of each kind.
#[derive(Debug, Default)]
pub struct FakeBuildExecutor {
    failing: BTreeSet<ArtifactKind>,
    missing_output: BTreeSet<ArtifactKind>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ArtifactKind>>,
}

impl FakeBuildExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds of `kind` exit with a compiler error.
    pub fn failing(mut self, kind: ArtifactKind) -> Self {
        self.failing.insert(kind);
        self
    }

    /// Builds of `kind` "succeed" without writing their output file.
    pub fn without_output(mut self, kind: ArtifactKind) -> Self {
        self.missing_output.insert(kind);
        self
    }

    /// Every build takes `delay` before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Kinds built so far, in call order.
    pub fn calls(&self) -> Vec<ArtifactKind> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildExecutor for FakeBuildExecutor {
    async fn build(
        &self,
        kind: ArtifactKind,
        profile: &BuildProfile,
        ctx: &BuildContext,
    ) -> Result<PathBuf, PipelineError> {
        self.calls.lock().unwrap().push(kind);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&kind) {
            return Err(PipelineError::Build {
                kind,
                message: "'cargo build' exited with code 101".to_string(),
            });
        }

        let path = output_path(kind, profile, &ctx.checkout);
        if !self.missing_output.contains(&kind) {
            let contents = format!("{}:{}:{}", kind, profile.mode, ctx.source_ref);
            write_executable(&path, contents.as_bytes())
                .await
                .map_err(|e| PipelineError::Build {
                    kind,
                    message: e.to_string(),
                })?;
        }
        require_output(kind, &path)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// FakePackager
// ---------------------------------------------------------------------------

/// Writes the image archive next to the binary without a container engine.
#[derive(Debug, Default)]
pub struct FakePackager {
    fail_with: Option<String>,
    packaged: Mutex<Vec<PathBuf>>,
    tags: Mutex<Vec<String>>,
}

impl FakePackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Binaries passed to `package`, in call order.
    pub fn packaged(&self) -> Vec<PathBuf> {
        self.packaged.lock().unwrap().clone()
    }

    /// Image tags passed to `package`, in call order.
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImagePackager for FakePackager {
    async fn package(
        &self,
        binary: &Path,
        tag: &str,
        _cancel: &CancelSignal,
    ) -> Result<PathBuf, PipelineError> {
        self.packaged.lock().unwrap().push(binary.to_path_buf());
        self.tags.lock().unwrap().push(tag.to_string());
        require_executable(binary)?;
        if let Some(message) = &self.fail_with {
            return Err(PipelineError::Packaging {
                message: message.clone(),
            });
        }
        let archive = image_archive_path(binary);
        let binary_bytes = tokio::fs::read(binary).await.map_err(|e| PipelineError::Packaging {
            message: e.to_string(),
        })?;
        let mut contents = b"image:".to_vec();
        contents.extend_from_slice(&binary_bytes);
        tokio::fs::write(&archive, contents)
            .await
            .map_err(|e| PipelineError::Packaging {
                message: e.to_string(),
            })?;
        Ok(archive)
    }
}
