//! Run lifecycle
//!
//! `Pending → Running → {Success, Error}`, with `Running → Pending` for
//! transient failures and `Pending → Error` for runs rejected before they
//! start. `Success` and `Error` are terminal.

use serde::{Deserialize, Serialize};

/// Fixed message stored when a script fails. Never includes subprocess output.
pub const RUN_FAILED_MESSAGE: &str = "ERROR: The computation could not run successfully. \
Please check the type of the variables used and other configurations to make sure it is all \
compatible with the computation.";

/// Fixed message stored when a script exceeds its time limit
pub const RUN_TIMED_OUT_MESSAGE: &str =
    "ERROR: The computation did not finish within the allowed time.";

/// Fixed message stored when a run keeps failing transiently
pub const RUN_RETRIES_EXHAUSTED_MESSAGE: &str =
    "ERROR: The computation could not be started after several attempts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

impl RunStatus {
    /// Whether no further automatic transition happens from this status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Error)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Error)
                | (Running, Success)
                | (Running, Error)
                | (Running, Pending)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status and result fields written back to the run store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub result_text: Option<String>,
    pub result_image: Option<String>,
}

impl RunUpdate {
    pub fn success(text: impl Into<String>, image: Option<String>) -> Self {
        Self {
            status: RunStatus::Success,
            result_text: Some(text.into()),
            result_image: image,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            result_text: Some(text.into()),
            result_image: None,
        }
    }

    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            result_text: None,
            result_image: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            status: RunStatus::Pending,
            result_text: None,
            result_image: None,
        }
    }
}
