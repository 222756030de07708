//! Pipeline orchestration.
//!
//! A run walks `Init -> ToolchainReady -> Building -> [Packaging] ->
//! Publishing -> Done`, dropping to `Failed` on the first error. Builds of
//! independent kinds run concurrently; publishing only starts once every
//! build and the packaging step have succeeded, so a failed run publishes
//! nothing.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tracing::{info, Instrument};

use aleph_ci_domain::{
    ArtifactDescriptor, ArtifactKind, BuildProfile, BuildRequest, PipelineError, RunState,
};
use aleph_ci_store::{ArtifactStore, CompilationCache, FsArtifactStore};

use crate::cancel::CancelSignal;
use crate::config::PipelineConfig;
use crate::executor::{BuildContext, BuildExecutor, CachingBuildExecutor, CargoBuildExecutor};
use crate::obs;
use crate::packaging::{run_image_tag, DockerImagePackager, ImagePackager};
use crate::publisher::ArtifactPublisher;
use crate::run::{PipelineRun, RunFailure, RunReport};
use crate::toolchain::{RustupToolchainProvider, ToolchainProvider};

/// Fail with `Cancelled` if cancellation was already requested.
fn check_cancel(cancel: &CancelSignal, stage: RunState) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled { stage })
    } else {
        Ok(())
    }
}

/// Race `fut` against cancellation. Dropping `fut` kills any child process
/// it spawned.
async fn until_cancelled<T, F>(
    cancel: &CancelSignal,
    stage: RunState,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
        result = fut => result,
    }
}

/// Release pipeline orchestrator with injected collaborators.
pub struct ReleasePipeline {
    config: PipelineConfig,
    toolchain: Arc<dyn ToolchainProvider>,
    executor: Arc<dyn BuildExecutor>,
    packager: Arc<dyn ImagePackager>,
    publisher: ArtifactPublisher,
}

impl ReleasePipeline {
    pub fn new(
        config: PipelineConfig,
        toolchain: Arc<dyn ToolchainProvider>,
        executor: Arc<dyn BuildExecutor>,
        packager: Arc<dyn ImagePackager>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            toolchain,
            executor,
            packager,
            publisher: ArtifactPublisher::new(store),
        }
    }

    /// Wire the real collaborators: rustup, cargo (behind the compilation
    /// cache when one is configured), a container engine and the filesystem
    /// store.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let store = FsArtifactStore::new(&config.store_root).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot open artifact store {}: {e}",
                config.store_root.display()
            ))
        })?;

        let cargo: Arc<dyn BuildExecutor> =
            Arc::new(CargoBuildExecutor::new(config.build_timeout_secs));
        let executor: Arc<dyn BuildExecutor> = match &config.cache_root {
            Some(root) => {
                let cache = CompilationCache::open(root).map_err(|e| {
                    PipelineError::Configuration(format!(
                        "cannot open compilation cache {}: {e}",
                        root.display()
                    ))
                })?;
                Arc::new(CachingBuildExecutor::new(cargo, Arc::new(cache)))
            }
            None => cargo,
        };

        let toolchain = Arc::new(RustupToolchainProvider::new(config.toolchain_timeout_secs));
        let packager = Arc::new(DockerImagePackager::new(
            &config.container_engine,
            config.package_timeout_secs,
        ));
        Ok(Self::new(
            config,
            toolchain,
            executor,
            packager,
            Arc::new(store),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run for `request`.
    ///
    /// Either every artifact of the request is published and the report
    /// carries the `{kind -> name}` outputs, or the run fails with the stage
    /// and artifact kind that broke. Never retries.
    pub async fn run(
        &self,
        request: &BuildRequest,
        cancel: CancelSignal,
    ) -> Result<RunReport, RunFailure> {
        let mut run = PipelineRun::new(request.clone());
        let span = obs::run_span(&run.run_id, &request.short_digest());

        async move {
            let start = Instant::now();
            obs::emit_run_started(&run.run_id, &request.git_ref, request.mode);

            match self.drive(&mut run, &cancel).await {
                Ok(()) => match run.finish() {
                    Ok(report) => {
                        obs::emit_run_finished(
                            &report.run_id,
                            start.elapsed().as_millis() as u64,
                            report.published.len(),
                        );
                        Ok(report)
                    }
                    Err(failure) => {
                        obs::emit_run_failed(&failure.run_id, &failure.error);
                        Err(failure)
                    }
                },
                Err(error) => {
                    obs::emit_run_failed(&run.run_id, &error);
                    Err(run.fail(error))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelSignal,
    ) -> Result<(), PipelineError> {
        let run_id = run.run_id.clone();
        let profile = run.profile.clone();
        let request = run.request.clone();

        // Init -> ToolchainReady
        check_cancel(cancel, RunState::Init)?;
        let spec = self.config.toolchain_spec();
        let toolchain = until_cancelled(
            cancel,
            RunState::Init,
            self.toolchain.acquire(&spec, cancel),
        )
        .await?;
        run.advance(RunState::ToolchainReady)?;

        // ToolchainReady -> Building
        check_cancel(cancel, RunState::ToolchainReady)?;
        run.advance(RunState::Building)?;
        let ctx = BuildContext {
            checkout: self.config.checkout.clone(),
            source_ref: request.git_ref.clone(),
            toolchain,
            cancel: cancel.clone(),
        };
        let builds = request
            .build_kinds()
            .into_iter()
            .map(|kind| self.build_one(&run_id, kind, &profile, &ctx));
        let built = until_cancelled(cancel, RunState::Building, try_join_all(builds)).await?;

        let mut artifacts: Vec<ArtifactDescriptor> = built
            .into_iter()
            .map(|(kind, path)| {
                ArtifactDescriptor::new(kind, &profile, path, self.config.retention_days)
            })
            .collect();

        // Building -> Packaging, production only
        if request.packages_image() {
            check_cancel(cancel, RunState::Building)?;
            run.advance(RunState::Packaging)?;
            let binary = artifacts
                .iter()
                .find(|a| a.kind == ArtifactKind::Binary)
                .map(|a| a.path.clone())
                .ok_or_else(|| PipelineError::Packaging {
                    message: "no binary was built".to_string(),
                })?;
            let tag = run_image_tag(
                &self.config.image_repository,
                &request.short_digest(),
                &run_id,
            );
            let archive = until_cancelled(
                cancel,
                RunState::Packaging,
                self.packager.package(&binary, &tag, cancel),
            )
            .await?;
            obs::emit_package_finished(&run_id, &archive);
            artifacts.push(ArtifactDescriptor::new(
                ArtifactKind::Image,
                &profile,
                archive,
                self.config.retention_days,
            ));
        }

        // {Building|Packaging} -> Publishing
        check_cancel(cancel, run.state())?;
        run.advance(RunState::Publishing)?;
        run.set_artifacts(artifacts.clone());
        for descriptor in &artifacts {
            check_cancel(cancel, RunState::Publishing)?;
            let reference = until_cancelled(
                cancel,
                RunState::Publishing,
                self.publisher.publish(descriptor),
            )
            .await?;
            obs::emit_artifact_published(
                &run_id,
                descriptor.kind,
                &reference.name,
                reference.digest.short(),
            );
            run.record_published(descriptor.kind, reference);
        }

        info!(run_id = %run_id, published = artifacts.len(), "All artifacts published");
        Ok(())
    }

    async fn build_one(
        &self,
        run_id: &str,
        kind: ArtifactKind,
        profile: &BuildProfile,
        ctx: &BuildContext,
    ) -> Result<(ArtifactKind, PathBuf), PipelineError> {
        let start = Instant::now();
        obs::emit_build_started(run_id, kind);
        let path = self.executor.build(kind, profile, ctx).await?;
        obs::emit_build_finished(run_id, kind, start.elapsed().as_millis() as u64);
        Ok((kind, path))
    }
}
