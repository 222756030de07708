//! Structured observability hooks for pipeline run lifecycle events.
//!
//! Every event is an `info!` (or `warn!` for failures) with an `event` field,
//! so JSON log output can be filtered by event name.

use tracing::{info, warn};

use aleph_ci_domain::{ArtifactKind, BuildMode, PipelineError, RunState};

/// Span every event of one run is recorded under.
pub fn run_span(run_id: &str, request_digest: &str) -> tracing::Span {
    tracing::info_span!("aleph_ci.run", run_id = %run_id, request = %request_digest)
}

pub fn emit_run_started(run_id: &str, git_ref: &str, mode: BuildMode) {
    info!(event = "run.started", run_id = %run_id, git_ref = %git_ref, mode = %mode);
}

pub fn emit_transition(run_id: &str, from: RunState, to: RunState) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to);
}

pub fn emit_build_started(run_id: &str, kind: ArtifactKind) {
    info!(event = "build.started", run_id = %run_id, kind = %kind);
}

pub fn emit_build_finished(run_id: &str, kind: ArtifactKind, duration_ms: u64) {
    info!(event = "build.finished", run_id = %run_id, kind = %kind, duration_ms = duration_ms);
}

pub fn emit_package_finished(run_id: &str, archive: &std::path::Path) {
    info!(event = "package.finished", run_id = %run_id, archive = %archive.display());
}

pub fn emit_artifact_published(run_id: &str, kind: ArtifactKind, name: &str, digest: &str) {
    info!(
        event = "artifact.published",
        run_id = %run_id,
        kind = %kind,
        name = %name,
        digest = %digest,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, published: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        published = published,
    );
}

/// Failure names the stage and, when known, the artifact kind.
pub fn emit_run_failed(run_id: &str, error: &PipelineError) {
    warn!(
        event = "run.failed",
        run_id = %run_id,
        stage = %error.stage(),
        kind = error.artifact_kind().map(|k| k.name()).unwrap_or("-"),
        category = error.category(),
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = run_span("test-run-id", "abc123").entered();
        emit_transition("test-run-id", RunState::Init, RunState::ToolchainReady);
    }
}
