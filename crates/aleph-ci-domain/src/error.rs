//! Error taxonomy for pipeline runs.
//!
//! Every failure is fatal to the run that raised it. The variants carry the
//! artifact kind they concern so that a failed run can say which stage and
//! which artifact broke.

use thiserror::Error;

use crate::artifact::ArtifactKind;
use crate::state::RunState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Toolchain '{channel}' unavailable: {message}")]
    Toolchain { channel: String, message: String },

    #[error("Build of {kind} failed: {message}")]
    Build { kind: ArtifactKind, message: String },

    #[error("Packaging of image failed: {message}")]
    Packaging { message: String },

    #[error("Publishing {kind} artifact '{name}' failed: {message}")]
    Publish {
        kind: ArtifactKind,
        name: String,
        message: String,
    },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: RunState },

    #[error("Invalid run state transition: {current} -> {requested}")]
    InvalidTransition {
        current: RunState,
        requested: RunState,
    },
}

impl PipelineError {
    /// The stage in which this failure arises.
    pub fn stage(&self) -> RunState {
        match self {
            PipelineError::Configuration(_) | PipelineError::Toolchain { .. } => RunState::Init,
            PipelineError::Build { .. } => RunState::Building,
            PipelineError::Packaging { .. } => RunState::Packaging,
            PipelineError::Publish { .. } => RunState::Publishing,
            PipelineError::Cancelled { stage } => *stage,
            PipelineError::InvalidTransition { current, .. } => *current,
        }
    }

    /// The artifact kind concerned, when the failure is tied to one.
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        match self {
            PipelineError::Build { kind, .. } | PipelineError::Publish { kind, .. } => Some(*kind),
            PipelineError::Packaging { .. } => Some(ArtifactKind::Image),
            _ => None,
        }
    }

    /// Short failure category name.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration_failure",
            PipelineError::Toolchain { .. } => "toolchain_failure",
            PipelineError::Build { .. } => "build_failure",
            PipelineError::Packaging { .. } => "packaging_failure",
            PipelineError::Publish { .. } => "publish_failure",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// Result type for pipeline domain operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_names_kind_and_stage() {
        let err = PipelineError::Build {
            kind: ArtifactKind::RuntimeBlob,
            message: "exit code 101".to_string(),
        };
        assert_eq!(err.stage(), RunState::Building);
        assert_eq!(err.artifact_kind(), Some(ArtifactKind::RuntimeBlob));
        assert_eq!(err.category(), "build_failure");
        assert!(err.to_string().contains("runtime"));
        assert!(err.to_string().contains("exit code 101"));
    }

    #[test]
    fn test_publish_error_display() {
        let err = PipelineError::Publish {
            kind: ArtifactKind::Binary,
            name: "aleph-node-test".to_string(),
            message: "no files found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aleph-node-test"));
        assert!(msg.contains("no files found"));
        assert_eq!(err.stage(), RunState::Publishing);
    }

    #[test]
    fn test_configuration_error_has_no_kind() {
        let err = PipelineError::Configuration("ref is empty".to_string());
        assert_eq!(err.stage(), RunState::Init);
        assert!(err.artifact_kind().is_none());
    }

    #[test]
    fn test_cancelled_keeps_stage() {
        let err = PipelineError::Cancelled {
            stage: RunState::Packaging,
        };
        assert_eq!(err.stage(), RunState::Packaging);
        assert_eq!(err.category(), "cancelled");
    }
}
