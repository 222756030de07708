//! Aleph CI - build-and-release pipeline for aleph-node
//!
//! Provides a release pipeline orchestrator that:
//! - Acquires the toolchain and builds the node binary and runtime blob in parallel
//! - Packages the production binary into a container image archive
//! - Publishes every artifact under a deterministic name, all or nothing
//! - Aborts promptly on cancellation without corrupting the shared cache

pub mod cancel;
pub mod config;
pub mod executor;
pub mod fakes;
pub mod obs;
pub mod packaging;
pub mod pipeline;
pub mod publisher;
pub mod run;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod toolchain;

// Re-export key types
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::PipelineConfig;
pub use executor::{BuildContext, BuildExecutor, CachingBuildExecutor, CargoBuildExecutor};
pub use packaging::{DockerImagePackager, ImagePackager};
pub use pipeline::ReleasePipeline;
pub use publisher::ArtifactPublisher;
pub use run::{PipelineRun, RunFailure, RunOutputs, RunReport, TransitionRecord};
pub use runner::{CommandRunner, RunnerError, StageResult};
pub use stage::StageConfig;
pub use telemetry::init_tracing;
pub use toolchain::{RustupToolchainProvider, Toolchain, ToolchainProvider, ToolchainSpec};
