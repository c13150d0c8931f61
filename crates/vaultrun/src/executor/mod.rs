//! Script execution
//!
//! Runs a bound command as a subprocess and classifies how it ended.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::binder::BoundCommand;
use crate::config::ExecutionConfig;
use crate::types::ExecutionLimits;

mod process;

/// Errors that keep a script from running at all
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a script run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Exited zero with non-empty output (trimmed)
    Output(String),

    /// Exited zero without printing anything
    Empty,

    /// Exited non-zero or was killed by a signal
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Did not finish within the time limit and was killed
    TimedOut(Duration),

    /// Printed more than the output ceiling and was killed
    OutputLimitExceeded { limit: usize },
}

/// Runs bound commands with the configured environment
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ScriptExecutor {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
        }
    }

    /// Run `command` under `limits` and classify the result
    #[instrument(skip(self), fields(program = %command.program))]
    pub async fn run(
        &self,
        command: &BoundCommand,
        limits: &ExecutionLimits,
    ) -> Result<ScriptOutcome, ExecuteError> {
        let max_output = limits.max_output_bytes();
        let run = process::run_captured(command, max_output, |cmd| {
            if let Some(ref dir) = self.working_dir {
                cmd.current_dir(dir);
            }
            cmd.envs(&self.env);
        });

        let raw = match limits.timeout_duration() {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(raw) => raw?,
                Err(_) => {
                    debug!(?timeout, "script timed out");
                    return Ok(ScriptOutcome::TimedOut(timeout));
                }
            },
            None => run.await?,
        };

        let Some(status) = raw.status else {
            return Ok(ScriptOutcome::OutputLimitExceeded {
                limit: max_output.unwrap_or_default(),
            });
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&raw.stderr).trim().to_string();
            debug!(exit_code = ?status.code(), %stderr, "script failed");
            return Ok(ScriptOutcome::Failed {
                exit_code: status.code(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&raw.stdout).trim().to_string();
        debug!(len = stdout.len(), "script finished");
        if stdout.is_empty() {
            Ok(ScriptOutcome::Empty)
        } else {
            Ok(ScriptOutcome::Output(stdout))
        }
    }
}
