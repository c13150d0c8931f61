use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::RunStatus;

pub type RunId = u64;
pub type DatasetId = u64;
pub type UserId = u64;
pub type RequestId = u64;
pub type ComputationId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall clock limit for a script in seconds
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Maximum captured stdout in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,
}

impl ExecutionLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override layer
    pub fn unset() -> Self {
        Self {
            timeout: None,
            max_output: None,
        }
    }

    /// Set the wall clock limit in seconds
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Set the stdout ceiling in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ExecutionLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ExecutionLimits) -> ExecutionLimits {
        ExecutionLimits {
            timeout: overrides.timeout.or(self.timeout),
            max_output: overrides.max_output.or(self.max_output),
        }
    }

    /// The timeout as a [`Duration`], if one is set and positive
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// The stdout ceiling in bytes, if one is set
    pub fn max_output_bytes(&self) -> Option<usize> {
        self.max_output
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Some(300.0),
            max_output: Some(Self::MB),
        }
    }
}

/// What a computation's script is expected to print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Text,
    Graph,
    TextAndGraph,
}

impl ReturnKind {
    /// Whether the script must report a saved plot
    #[must_use]
    pub fn expects_image(&self) -> bool {
        matches!(self, ReturnKind::Graph | ReturnKind::TextAndGraph)
    }
}

/// A predefined analysis script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationDefinition {
    pub id: ComputationId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Command template.
    /// Placeholders: {dataset_file}, {variable}, {variables}, {user_id}
    pub command: String,

    pub return_kind: ReturnKind,

    /// Number of variables a run must bind
    #[serde(default)]
    pub number_of_variables: usize,

    /// Inactive definitions are hidden from users but queued runs still execute
    #[serde(default = "default_active")]
    pub active: bool,

    /// Per-computation limits (override the configured defaults)
    #[serde(default)]
    pub limits: Option<ExecutionLimits>,
}

fn default_active() -> bool {
    true
}

impl ComputationDefinition {
    /// Check that a comma-joined variables string binds the expected number of columns
    pub fn check_variables(&self, variables: &str) -> Result<(), VariableCountMismatch> {
        let found = variable_count(variables);
        if found == self.number_of_variables {
            Ok(())
        } else {
            Err(VariableCountMismatch {
                expected: self.number_of_variables,
                found,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("computation expects {expected} variable(s), got {found}")]
pub struct VariableCountMismatch {
    pub expected: usize,
    pub found: usize,
}

/// Number of column names in a comma-joined variables string (empty string is zero)
pub fn variable_count(variables: &str) -> usize {
    if variables.is_empty() {
        0
    } else {
        variables.split(',').count()
    }
}

/// Where a run gets its dataset from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RunSource {
    /// Through an access request; the dataset is the request's dataset
    ViaRequest(RequestId),
    /// Directly against a dataset
    ViaDataset(DatasetId),
}

/// One execution attempt of a computation against a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationRun {
    pub id: RunId,

    pub source: RunSource,

    pub computation_id: ComputationId,

    /// The user who queued the run
    #[serde(default)]
    pub runner_id: Option<UserId>,

    /// Comma-joined column names
    #[serde(default)]
    pub variables: String,

    #[serde(default)]
    pub status: RunStatus,

    #[serde(default)]
    pub result_text: Option<String>,

    /// Path of the produced plot, relative to the plot directory
    #[serde(default)]
    pub result_image: Option<String>,

    /// Number of transient failures so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ComputationRun {
    /// Create a fresh pending run
    pub fn new(
        id: RunId,
        source: RunSource,
        computation_id: ComputationId,
        runner_id: Option<UserId>,
        variables: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            computation_id,
            runner_id,
            variables: variables.into(),
            status: RunStatus::Pending,
            result_text: None,
            result_image: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,

    pub owner_id: UserId,

    /// Ciphertext file name inside the data directory
    pub filename: String,

    #[serde(default)]
    pub requires_permission: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Granted,
    Denied,
}

/// An owner's decision on a user's request to compute on a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,

    pub dataset_id: DatasetId,

    pub requester_id: UserId,

    pub owner_id: UserId,

    #[serde(default)]
    pub status: RequestStatus,
}
