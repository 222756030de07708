//! Per-run bookkeeping: state, transition log, outputs and the final report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use aleph_ci_domain::{
    resolve, ArtifactDescriptor, ArtifactKind, BuildProfile, BuildRequest, PipelineError, RunState,
};
use aleph_ci_store::PublishedRef;

use crate::obs;

/// One state change of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// A single execution of the pipeline for one [`BuildRequest`].
///
/// Owns the request and its resolved profile. Not persisted: the report or
/// failure built from it is all that outlives the run.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub request: BuildRequest,
    pub profile: BuildProfile,
    pub started_at: DateTime<Utc>,
    state: RunState,
    transitions: Vec<TransitionRecord>,
    artifacts: Vec<ArtifactDescriptor>,
    published: Vec<(ArtifactKind, PublishedRef)>,
}

impl PipelineRun {
    pub fn new(request: BuildRequest) -> Self {
        let profile = resolve(request.mode);
        Self {
            run_id: Uuid::new_v4().to_string(),
            request,
            profile,
            started_at: Utc::now(),
            state: RunState::Init,
            transitions: Vec::new(),
            artifacts: Vec::new(),
            published: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn artifacts(&self) -> &[ArtifactDescriptor] {
        &self.artifacts
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        let from = self.state;
        self.state = from.transition(next)?;
        self.transitions.push(TransitionRecord {
            from,
            to: next,
            at: Utc::now(),
        });
        obs::emit_transition(&self.run_id, from, next);
        Ok(())
    }

    /// Record artifacts handed to the publishing stage.
    pub fn set_artifacts(&mut self, artifacts: Vec<ArtifactDescriptor>) {
        self.artifacts = artifacts;
    }

    pub fn record_published(&mut self, kind: ArtifactKind, reference: PublishedRef) {
        self.published.push((kind, reference));
    }

    /// Terminate as `Failed`, remembering the stage the run was in.
    pub fn fail(mut self, error: PipelineError) -> RunFailure {
        let stage = self.state;
        if self.advance(RunState::Failed).is_err() {
            self.state = RunState::Failed;
        }
        RunFailure {
            run_id: self.run_id,
            request: self.request,
            stage,
            kind: error.artifact_kind(),
            error,
            transitions: self.transitions,
        }
    }

    /// Terminate as `Done` and build the report.
    pub fn finish(mut self) -> Result<RunReport, RunFailure> {
        if let Err(e) = self.advance(RunState::Done) {
            return Err(self.fail(e));
        }
        let finished_at = Utc::now();
        let outputs = RunOutputs::from_published(&self.published);
        Ok(RunReport {
            run_id: self.run_id,
            request_digest: self.request.digest(),
            request: self.request,
            profile: self.profile,
            state: self.state,
            transitions: self.transitions,
            artifacts: self.artifacts,
            published: self.published.into_iter().map(|(_, r)| r).collect(),
            outputs,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
        })
    }
}

/// Mapping from artifact kind to the name it was published under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutputs(BTreeMap<ArtifactKind, String>);

impl RunOutputs {
    fn from_published(published: &[(ArtifactKind, PublishedRef)]) -> Self {
        Self(
            published
                .iter()
                .map(|(kind, r)| (*kind, r.name.clone()))
                .collect(),
        )
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Outputs keyed the way callers consume them
    /// (`artifact-name-binary`, `artifact-name-image`, `aleph-runtime-artifact-name`).
    pub fn to_output_map(&self) -> BTreeMap<&'static str, String> {
        self.0
            .iter()
            .map(|(kind, name)| (kind.output_key(), name.clone()))
            .collect()
    }
}

/// Archive of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub request: BuildRequest,
    pub request_digest: String,
    pub profile: BuildProfile,
    pub state: RunState,
    pub transitions: Vec<TransitionRecord>,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub published: Vec<PublishedRef>,
    pub outputs: RunOutputs,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A run that ended in `Failed`. Carries no outputs.
#[derive(Debug, Clone, Error)]
#[error("run {run_id} failed during {stage}: {error}")]
pub struct RunFailure {
    pub run_id: String,
    pub request: BuildRequest,
    /// State the run was in when the failure arose.
    pub stage: RunState,
    /// Artifact kind concerned, when the failure is tied to one.
    pub kind: Option<ArtifactKind>,
    pub error: PipelineError,
    pub transitions: Vec<TransitionRecord>,
}

impl RunFailure {
    pub fn category(&self) -> &'static str {
        self.error.category()
    }

    /// Serializable summary for run archives.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id,
            "request": self.request,
            "state": RunState::Failed,
            "stage": self.stage,
            "kind": self.kind,
            "category": self.category(),
            "error": self.error.to_string(),
            "transitions": self.transitions,
        })
    }
}
