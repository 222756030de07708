//! Aleph CI Domain Model
//!
//! Pure types shared by every stage of the aleph-node release pipeline:
//! - BuildMode / BuildProfile: the mode axis and the compiler profile it resolves to
//! - BuildRequest: `(ref, mode)` input of a run, with a deterministic digest
//! - ArtifactKind / ArtifactDescriptor: what a run produces and how it is named
//! - RunState: the per-run lifecycle state machine
//! - PipelineError: failure taxonomy, every variant tied to a stage
//!
//! Nothing in this crate performs I/O. Given the same `(ref, mode)` the
//! resolved profile and the set of artifact names are always identical.

pub mod artifact;
pub mod error;
pub mod mode;
pub mod request;
pub mod state;

pub use artifact::{
    artifact_name, output_path, relative_output_path, ArtifactDescriptor, ArtifactKind,
    DEFAULT_RETENTION_DAYS, IMAGE_INSTALL_PATH, PRODUCT, RUNTIME_ARTIFACT_NAME,
};
pub use error::{PipelineError, Result};
pub use mode::{resolve, BuildMode, BuildProfile, OptimizationProfile};
pub use request::BuildRequest;
pub use state::RunState;
