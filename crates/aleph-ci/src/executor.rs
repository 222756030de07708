//! Build executor: one compiler invocation per artifact kind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use aleph_ci_domain::{output_path, ArtifactKind, BuildProfile, PipelineError, RunState};
use aleph_ci_store::{CacheKey, CompilationCache};

use crate::cancel::CancelSignal;
use crate::runner::CommandRunner;
use crate::stage::StageConfig;
use crate::toolchain::Toolchain;

/// Everything a build needs besides the kind and profile. Shared read-only by
/// the parallel builds of a run.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub checkout: PathBuf,
    pub source_ref: String,
    pub toolchain: Toolchain,
    pub cancel: CancelSignal,
}

/// Produces exactly one file per compiled artifact kind.
///
/// The returned path is `output_path(kind, profile, checkout)`.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn build(
        &self,
        kind: ArtifactKind,
        profile: &BuildProfile,
        ctx: &BuildContext,
    ) -> Result<PathBuf, PipelineError>;
}

fn build_err(kind: ArtifactKind, message: impl Into<String>) -> PipelineError {
    PipelineError::Build {
        kind,
        message: message.into(),
    }
}

/// Fails with a build error unless `path` exists after the build.
pub fn require_output(kind: ArtifactKind, path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(build_err(
            kind,
            format!("expected output {} does not exist", path.display()),
        ))
    }
}

/// Builds with `cargo` from the acquired toolchain.
pub struct CargoBuildExecutor {
    timeout_secs: u64,
}

impl CargoBuildExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl BuildExecutor for CargoBuildExecutor {
    async fn build(
        &self,
        kind: ArtifactKind,
        profile: &BuildProfile,
        ctx: &BuildContext,
    ) -> Result<PathBuf, PipelineError> {
        let config =
            StageConfig::cargo_build(kind, profile, &ctx.toolchain.channel, self.timeout_secs)
                .ok_or_else(|| build_err(kind, "not a compiled artifact kind"))?
                .in_dir(&ctx.checkout);

        let result = CommandRunner::execute_stage(&config, &ctx.cancel)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    PipelineError::Cancelled {
                        stage: RunState::Building,
                    }
                } else {
                    build_err(kind, e.to_string())
                }
            })?;
        if !result.passed() {
            return Err(build_err(kind, result.failure_summary()));
        }

        let path = output_path(kind, profile, &ctx.checkout);
        require_output(kind, &path)?;
        info!(kind = %kind, path = %path.display(), duration_ms = result.duration_ms, "Build finished");
        Ok(path)
    }
}

/// Whether `source_ref` names one immutable commit (a full SHA-1 or SHA-256
/// hex object id), as opposed to a branch or tag that can move.
pub fn is_commit_sha(source_ref: &str) -> bool {
    matches!(source_ref.len(), 40 | 64) && source_ref.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Wraps another executor with the shared [`CompilationCache`].
///
/// Entries are keyed by `(ref, mode, kind, profile, features)`, and only refs
/// that pass [`is_commit_sha`] use the cache. The cache is an optimisation
/// only: lookup or store errors are logged and the build goes on.
pub struct CachingBuildExecutor {
    inner: Arc<dyn BuildExecutor>,
    cache: Arc<CompilationCache>,
}

impl CachingBuildExecutor {
    pub fn new(inner: Arc<dyn BuildExecutor>, cache: Arc<CompilationCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache_key(kind: ArtifactKind, profile: &BuildProfile, source_ref: &str) -> CacheKey {
        let features = profile.features_arg().unwrap_or_default();
        CacheKey::derive(&[
            source_ref,
            profile.mode.name(),
            kind.name(),
            profile.optimization.cargo_profile(),
            features.as_str(),
        ])
    }
}

#[async_trait]
impl BuildExecutor for CachingBuildExecutor {
    async fn build(
        &self,
        kind: ArtifactKind,
        profile: &BuildProfile,
        ctx: &BuildContext,
    ) -> Result<PathBuf, PipelineError> {
        if !is_commit_sha(&ctx.source_ref) {
            debug!(
                kind = %kind,
                source_ref = %ctx.source_ref,
                "Ref is not a commit id, bypassing cache"
            );
            return self.inner.build(kind, profile, ctx).await;
        }
        let key = Self::cache_key(kind, profile, &ctx.source_ref);
        let path = output_path(kind, profile, &ctx.checkout);

        match self.cache.restore(&key, &path).await {
            Ok(true) => {
                info!(kind = %kind, key = %key.short(), "Restored build output from cache");
                return Ok(path);
            }
            Ok(false) => {}
            Err(e) => warn!(kind = %kind, error = %e, "Cache lookup failed, building"),
        }

        let built = self.inner.build(kind, profile, ctx).await?;
        if let Err(e) = self.cache.store(&key, &built).await {
            warn!(kind = %kind, error = %e, "Failed to store build output in cache");
        }
        Ok(built)
    }
}
