//! Packaging stage: wraps the node binary into a container image archive.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use aleph_ci_domain::{PipelineError, RunState, IMAGE_INSTALL_PATH, PRODUCT};

use crate::cancel::CancelSignal;
use crate::runner::{CommandRunner, StageResult};
use crate::stage::StageConfig;

/// Turns a built binary into a single image archive file.
///
/// `tag` belongs to the calling run alone; implementations must not build or
/// export under any other name.
#[async_trait]
pub trait ImagePackager: Send + Sync {
    async fn package(
        &self,
        binary: &Path,
        tag: &str,
        cancel: &CancelSignal,
    ) -> Result<PathBuf, PipelineError>;
}

/// Tag for one run's image: `<repository>:<request_digest>-<run_id>`.
pub fn run_image_tag(repository: &str, request_digest: &str, run_id: &str) -> String {
    format!("{repository}:{request_digest}-{run_id}")
}

fn packaging_err(message: impl Into<String>) -> PipelineError {
    PipelineError::Packaging {
        message: message.into(),
    }
}

/// Archive path for an image built from `binary`: a sibling named
/// `aleph-node-image.tar`, which matches `output_path(Image, ..)`.
pub fn image_archive_path(binary: &Path) -> PathBuf {
    binary.with_file_name(format!("{PRODUCT}-image.tar"))
}

/// Dockerfile installing the binary at [`IMAGE_INSTALL_PATH`].
pub fn dockerfile() -> String {
    format!(
        "FROM ubuntu:jammy\n\
         RUN apt-get update && apt-get install -y --no-install-recommends ca-certificates curl \\\n    \
         && rm -rf /var/lib/apt/lists/*\n\
         EXPOSE 30333 30343 9944\n\
         WORKDIR /node\n\
         COPY {PRODUCT} {IMAGE_INSTALL_PATH}\n\
         RUN chmod +x {IMAGE_INSTALL_PATH}\n\
         ENTRYPOINT [\"{IMAGE_INSTALL_PATH}\"]\n"
    )
}

/// Fails unless `binary` is an existing, executable regular file.
pub fn require_executable(binary: &Path) -> Result<(), PipelineError> {
    let meta = std::fs::metadata(binary)
        .map_err(|_| packaging_err(format!("binary {} is missing", binary.display())))?;
    if !meta.is_file() {
        return Err(packaging_err(format!(
            "binary {} is not a regular file",
            binary.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(packaging_err(format!(
                "binary {} is not executable",
                binary.display()
            )));
        }
    }
    Ok(())
}

/// Builds images with a docker-compatible engine (`docker`, `podman`).
pub struct DockerImagePackager {
    engine: String,
    timeout_secs: u64,
}

impl DockerImagePackager {
    pub fn new(engine: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            engine: engine.into(),
            timeout_secs,
        }
    }

    async fn run(
        &self,
        config: StageConfig,
        cancel: &CancelSignal,
    ) -> Result<StageResult, PipelineError> {
        let result = CommandRunner::execute_stage(&config, cancel)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    PipelineError::Cancelled {
                        stage: RunState::Packaging,
                    }
                } else {
                    packaging_err(e.to_string())
                }
            })?;
        if result.passed() {
            Ok(result)
        } else {
            Err(packaging_err(result.failure_summary()))
        }
    }

    /// Drop the run's tag from the engine; the archive is all that is kept.
    async fn remove_tag(&self, tag: &str) {
        let config = StageConfig::image_remove(&self.engine, tag, self.timeout_secs);
        match CommandRunner::execute_stage(&config, &CancelSignal::never()).await {
            Ok(result) if result.passed() => {}
            Ok(result) => {
                warn!(tag = %tag, error = %result.failure_summary(), "Failed to remove image tag")
            }
            Err(e) => warn!(tag = %tag, error = %e, "Failed to remove image tag"),
        }
    }
}

#[async_trait]
impl ImagePackager for DockerImagePackager {
    async fn package(
        &self,
        binary: &Path,
        tag: &str,
        cancel: &CancelSignal,
    ) -> Result<PathBuf, PipelineError> {
        require_executable(binary)?;

        let context = tempfile::Builder::new()
            .prefix("aleph-node-image-")
            .tempdir()
            .map_err(|e| packaging_err(format!("failed to create build context: {e}")))?;
        std::fs::copy(binary, context.path().join(PRODUCT))
            .map_err(|e| packaging_err(format!("failed to stage binary: {e}")))?;
        std::fs::write(context.path().join("Dockerfile"), dockerfile())
            .map_err(|e| packaging_err(format!("failed to write Dockerfile: {e}")))?;

        self.run(
            StageConfig::image_build(&self.engine, tag, context.path(), self.timeout_secs),
            cancel,
        )
        .await?;

        let archive = image_archive_path(binary);
        let saved = self
            .run(
                StageConfig::image_save(&self.engine, tag, &archive, self.timeout_secs),
                cancel,
            )
            .await;
        self.remove_tag(tag).await;
        saved?;

        if !archive.is_file() {
            return Err(packaging_err(format!(
                "image archive {} was not written",
                archive.display()
            )));
        }
        info!(tag = %tag, archive = %archive.display(), "Image packaged");
        Ok(archive)
    }
}
