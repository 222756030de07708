//! Run lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Lifecycle state of a pipeline run.
///
/// `Init` is the only initial state; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    ToolchainReady,
    Building,
    Packaging,
    Publishing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Init, ToolchainReady) => true,
            (ToolchainReady, Building) => true,
            (Building, Packaging) | (Building, Publishing) => true,
            (Packaging, Publishing) => true,
            (Publishing, Done) => true,
            _ => false,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: RunState) -> Result<RunState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                current: self,
                requested: next,
            })
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Init => write!(f, "init"),
            RunState::ToolchainReady => write!(f, "toolchain_ready"),
            RunState::Building => write!(f, "building"),
            RunState::Packaging => write!(f, "packaging"),
            RunState::Publishing => write!(f, "publishing"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}
