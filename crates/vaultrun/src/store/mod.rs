//! Run storage and dataset resolution
//!
//! The pipeline reads and writes runs only through [`RunStore`] and reaches
//! datasets only through [`DatasetProvider`]. [`MemoryStore`] implements both
//! over an in-process snapshot that can be loaded from and saved to JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::store::memory::{MemoryStore, StoreSnapshot, UserKeys};
use crate::codec::{CodecError, KeyMaterial};
use crate::gate::Denial;
use crate::state::{RunStatus, RunUpdate};
use crate::types::{
    AccessRequest, ComputationDefinition, ComputationId, ComputationRun, Dataset, DatasetId,
    RequestId, RunId, RunSource, UserId, VariableCountMismatch,
};

mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("computation {0} not found")]
    ComputationNotFound(ComputationId),

    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),

    #[error("access request {0} not found")]
    RequestNotFound(RequestId),

    #[error("no key material stored for user {0}")]
    KeysNotFound(UserId),

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("dataset filename '{0}' is not a plain file name")]
    InvalidFilename(String),

    #[error("run rejected: {0}")]
    Rejected(#[from] Denial),

    #[error("run rejected: {0}")]
    Variables(#[from] VariableCountMismatch),

    #[error("key material: {0}")]
    KeyMaterial(#[from] CodecError),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// A queued run together with its computation definition
#[derive(Debug, Clone)]
pub struct PendingRun {
    pub run: ComputationRun,
    /// `None` if the definition no longer exists
    pub computation: Option<ComputationDefinition>,
}

/// Everything needed to decrypt and authorize a run's dataset
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub dataset: Dataset,
    /// Location of the encrypted dataset file
    pub ciphertext_path: PathBuf,
    /// The dataset owner's key material
    pub key: KeyMaterial,
    /// The access request the run goes through, if any
    pub request: Option<AccessRequest>,
}

/// Persistence for computation runs
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Number of runs waiting to execute
    async fn count_pending(&self) -> Result<usize, StoreError>;

    /// Every pending run with its computation definition
    async fn list_pending(&self) -> Result<Vec<PendingRun>, StoreError>;

    async fn get(&self, run_id: RunId) -> Result<ComputationRun, StoreError>;

    /// Move a run from `Pending` to `Running`.
    ///
    /// Returns `false` without changing anything if the run is no longer
    /// pending, so only one dispatcher ever executes a given run.
    async fn mark_running(&self, run_id: RunId) -> Result<bool, StoreError>;

    /// Write a status and its result fields if the run is still in `expected`.
    ///
    /// Returns `false` without changing anything if the run has moved on,
    /// e.g. because another dispatcher claimed it.
    async fn set_status(
        &self,
        run_id: RunId,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<bool, StoreError>;

    /// Put a run back to `Pending` after a transient failure, if it is still
    /// in `expected`.
    ///
    /// Returns the number of transient failures recorded for the run, or
    /// `None` if the run was not in `expected`.
    async fn requeue(
        &self,
        run_id: RunId,
        expected: RunStatus,
    ) -> Result<Option<u32>, StoreError>;
}

/// Resolves a run's data source to its dataset, key material, and request
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn resolve(&self, source: RunSource) -> Result<ResolvedSource, StoreError>;
}
