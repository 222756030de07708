//! External command execution.

use crate::cancel::CancelSignal;
use crate::stage::StageConfig;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Lines of stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// One-line reason plus the tail of stderr, for error messages.
    pub fn failure_summary(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        if tail.is_empty() {
            format!("'{}' exited with code {}", self.stage_name, self.exit_code)
        } else {
            format!(
                "'{}' exited with code {}:\n{}",
                self.stage_name, self.exit_code, tail
            )
        }
    }
}

/// Ways a stage can fail to produce a [`StageResult`] at all.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Stage {0} has empty command")]
    EmptyCommand(String),

    #[error("Failed to spawn stage {stage}: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("Stage {stage} was cancelled")]
    Cancelled { stage: String },

    #[error("I/O error while running stage {stage}: {source}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled { .. })
    }
}

/// Runs [`StageConfig`]s as child processes.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a single stage and return the result.
    ///
    /// A non-zero exit is reported through `StageResult::success`, not as an
    /// error. The child is killed if the timeout elapses, if `cancel` fires,
    /// or if the returned future is dropped.
    pub async fn execute_stage(
        config: &StageConfig,
        cancel: &CancelSignal,
    ) -> Result<StageResult, RunnerError> {
        let start = Instant::now();

        if config.command.is_empty() {
            return Err(RunnerError::EmptyCommand(config.name.clone()));
        }
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled {
                stage: config.name.clone(),
            });
        }

        let exe = &config.command[0];
        let args = &config.command[1..];

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        debug!(stage = %config.name, command = ?config.command, "spawning stage");
        let child = command.spawn().map_err(|source| RunnerError::Spawn {
            stage: config.name.clone(),
            source,
        })?;

        let io_err = |source| RunnerError::Io {
            stage: config.name.clone(),
            source,
        };
        let wait = async {
            if config.timeout_secs > 0 {
                tokio::time::timeout(
                    Duration::from_secs(config.timeout_secs),
                    child.wait_with_output(),
                )
                .await
                .map_err(|_| RunnerError::Timeout {
                    stage: config.name.clone(),
                    secs: config.timeout_secs,
                })?
                .map_err(io_err)
            } else {
                child.wait_with_output().await.map_err(io_err)
            }
        };

        let output = tokio::select! {
            output = wait => output?,
            _ = cancel.cancelled() => {
                return Err(RunnerError::Cancelled {
                    stage: config.name.clone(),
                });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let success = output.status.success();

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;

    fn sh(name: &str, script: &str, timeout_secs: u64) -> StageConfig {
        StageConfig::custom(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs,
        )
    }

    #[test]
    fn test_stage_result_passed() {
        let result = StageResult {
            stage_name: "build_binary".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_failure_summary_keeps_tail() {
        let stderr: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let result = StageResult {
            stage_name: "build_runtime".to_string(),
            exit_code: 101,
            stdout: "".to_string(),
            stderr,
            duration_ms: 100,
            success: false,
        };
        assert!(!result.passed());
        let summary = result.failure_summary();
        assert!(summary.contains("code 101"));
        assert!(summary.contains("line 49"));
        assert!(!summary.contains("line 29\n"));
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let config = StageConfig::custom(
            "echo_test",
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );

        let result = CommandRunner::execute_stage(&config, &CancelSignal::never())
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let config = StageConfig::custom("false_test", vec!["false".to_string()], 60);

        let result = CommandRunner::execute_stage(&config, &CancelSignal::never())
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = sh("pwd_test", "pwd", 60).in_dir(dir.path());

        let result = CommandRunner::execute_stage(&config, &CancelSignal::never())
            .await
            .expect("execute failed");
        assert!(result.passed());
        let canonical = dir.path().canonicalize().unwrap();
        assert!(result.stdout.contains(canonical.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = sh("sleep_test", "sleep 5", 1);
        let err = CommandRunner::execute_stage(&config, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_stage() {
        let (handle, signal) = cancel_pair();
        let config = sh("sleep_test", "sleep 30", 0);
        let task =
            tokio::spawn(async move { CommandRunner::execute_stage(&config, &signal).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancel should be prompt")
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let config = StageConfig::custom(
            "exec_error_stage",
            vec!["/nonexistent-binary-that-does-not-exist".to_string()],
            5,
        );
        let err = CommandRunner::execute_stage(&config, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let empty = StageConfig::custom("empty", vec![], 5);
        assert!(matches!(
            CommandRunner::execute_stage(&empty, &CancelSignal::never()).await,
            Err(RunnerError::EmptyCommand(_))
        ));
    }
}
