//! Toolchain acquisition.
//!
//! The toolchain is an external collaborator: the pipeline only needs to know
//! that the requested channel, targets and components are installed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use aleph_ci_domain::{PipelineError, RunState};

use crate::cancel::CancelSignal;
use crate::runner::CommandRunner;
use crate::stage::StageConfig;

/// Host target the node is compiled for.
pub const HOST_TARGET: &str = "x86_64-unknown-linux-gnu";

/// Target the runtime blob is cross-compiled to.
pub const WASM_TARGET: &str = "wasm32-unknown-unknown";

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSpec {
    pub channel: String,
    pub targets: Vec<String>,
    pub components: Vec<String>,
}

impl ToolchainSpec {
    /// Channel with the host + wasm targets and `rustfmt`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            targets: vec![HOST_TARGET.to_string(), WASM_TARGET.to_string()],
            components: vec!["rustfmt".to_string()],
        }
    }

    /// `rustup toolchain install` invocation for this spec.
    pub fn install_command(&self) -> Vec<String> {
        let mut command = vec![
            "rustup".to_string(),
            "toolchain".to_string(),
            "install".to_string(),
            self.channel.clone(),
            "--profile".to_string(),
            "minimal".to_string(),
        ];
        for target in &self.targets {
            command.push("--target".to_string());
            command.push(target.clone());
        }
        for component in &self.components {
            command.push("--component".to_string());
            command.push(component.clone());
        }
        command
    }
}

/// An acquired toolchain. Only its availability matters to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub channel: String,
}

impl Toolchain {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

/// Makes a toolchain available to the build stage.
#[async_trait]
pub trait ToolchainProvider: Send + Sync {
    async fn acquire(
        &self,
        spec: &ToolchainSpec,
        cancel: &CancelSignal,
    ) -> Result<Toolchain, PipelineError>;
}

/// Installs toolchains with `rustup`.
pub struct RustupToolchainProvider {
    timeout_secs: u64,
}

impl RustupToolchainProvider {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl ToolchainProvider for RustupToolchainProvider {
    async fn acquire(
        &self,
        spec: &ToolchainSpec,
        cancel: &CancelSignal,
    ) -> Result<Toolchain, PipelineError> {
        let config = StageConfig::custom(
            "toolchain_install",
            spec.install_command(),
            self.timeout_secs,
        );
        let toolchain_err = |message: String| PipelineError::Toolchain {
            channel: spec.channel.clone(),
            message,
        };

        let result = CommandRunner::execute_stage(&config, cancel)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    PipelineError::Cancelled {
                        stage: RunState::Init,
                    }
                } else {
                    toolchain_err(e.to_string())
                }
            })?;
        if !result.passed() {
            return Err(toolchain_err(result.failure_summary()));
        }

        info!(channel = %spec.channel, "Toolchain ready");
        Ok(Toolchain::new(&spec.channel))
    }
}
