//! In-memory store backed by a JSON snapshot

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::codec::KeyMaterial;
use crate::gate;
use crate::state::{RunStatus, RunUpdate};
use crate::store::{DatasetProvider, PendingRun, ResolvedSource, RunStore, StoreError};
use crate::types::{
    AccessRequest, ComputationDefinition, ComputationId, ComputationRun, Dataset, DatasetId,
    RequestId, RunId, RunSource, UserId,
};

/// Hex-encoded key material stored for a user
#[derive(Clone, Serialize, Deserialize)]
pub struct UserKeys {
    pub user_id: UserId,
    /// 16-byte salt, used as the IV
    pub salt: String,
    /// 32-byte secure token, used as the key
    pub secure_token: String,
}

impl std::fmt::Debug for UserKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKeys")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Serializable contents of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub computations: Vec<ComputationDefinition>,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
    #[serde(default)]
    pub requests: Vec<AccessRequest>,
    #[serde(default)]
    pub users: Vec<UserKeys>,
    #[serde(default)]
    pub runs: Vec<ComputationRun>,
}

#[derive(Debug, Default)]
struct State {
    computations: BTreeMap<ComputationId, ComputationDefinition>,
    datasets: BTreeMap<DatasetId, Dataset>,
    requests: BTreeMap<RequestId, AccessRequest>,
    users: BTreeMap<UserId, UserKeys>,
    runs: BTreeMap<RunId, ComputationRun>,
}

impl State {
    fn run_mut(&mut self, run_id: RunId) -> Result<&mut ComputationRun, StoreError> {
        self.runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))
    }

    /// Dataset and request behind a source, without key material
    fn source_records(
        &self,
        source: RunSource,
    ) -> Result<(Dataset, Option<AccessRequest>), StoreError> {
        match source {
            RunSource::ViaRequest(request_id) => {
                let request = self
                    .requests
                    .get(&request_id)
                    .ok_or(StoreError::RequestNotFound(request_id))?;
                let dataset = self
                    .datasets
                    .get(&request.dataset_id)
                    .ok_or(StoreError::DatasetNotFound(request.dataset_id))?;
                Ok((dataset.clone(), Some(request.clone())))
            }
            RunSource::ViaDataset(dataset_id) => {
                let dataset = self
                    .datasets
                    .get(&dataset_id)
                    .ok_or(StoreError::DatasetNotFound(dataset_id))?;
                Ok((dataset.clone(), None))
            }
        }
    }
}

/// Run store and dataset provider kept in memory
#[derive(Debug)]
pub struct MemoryStore {
    data_dir: PathBuf,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store whose dataset files live in `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::from_snapshot(StoreSnapshot::default(), data_dir)
    }

    pub fn from_snapshot(snapshot: StoreSnapshot, data_dir: impl Into<PathBuf>) -> Self {
        let state = State {
            computations: snapshot.computations.into_iter().map(|c| (c.id, c)).collect(),
            datasets: snapshot.datasets.into_iter().map(|d| (d.id, d)).collect(),
            requests: snapshot.requests.into_iter().map(|r| (r.id, r)).collect(),
            users: snapshot.users.into_iter().map(|u| (u.user_id, u)).collect(),
            runs: snapshot.runs.into_iter().map(|r| (r.id, r)).collect(),
        };
        Self {
            data_dir: data_dir.into(),
            state: Mutex::new(state),
        }
    }

    /// Load a JSON snapshot file
    pub async fn load(path: &Path, data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let content = tokio::fs::read(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&content)?;
        debug!(path = %path.display(), runs = snapshot.runs.len(), "loaded store snapshot");
        Ok(Self::from_snapshot(snapshot, data_dir))
    }

    /// Write the current contents to a JSON snapshot file
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        let content = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), runs = snapshot.runs.len(), "saved store snapshot");
        Ok(())
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            computations: state.computations.values().cloned().collect(),
            datasets: state.datasets.values().cloned().collect(),
            requests: state.requests.values().cloned().collect(),
            users: state.users.values().cloned().collect(),
            runs: state.runs.values().cloned().collect(),
        }
    }

    /// Queue a new run, applying the access policy and variable count check.
    ///
    /// Rejected runs are not stored.
    #[instrument(skip(self, variables))]
    pub async fn create_run(
        &self,
        source: RunSource,
        computation_id: ComputationId,
        runner_id: Option<UserId>,
        variables: &str,
    ) -> Result<ComputationRun, StoreError> {
        let mut state = self.state.lock().await;

        let computation = state
            .computations
            .get(&computation_id)
            .ok_or(StoreError::ComputationNotFound(computation_id))?;
        computation.check_variables(variables)?;

        let (dataset, request) = state.source_records(source)?;
        gate::authorize(request.as_ref(), Some(&dataset), runner_id)?;

        let id = state.runs.keys().next_back().map_or(1, |last| last + 1);
        let run = ComputationRun::new(id, source, computation_id, runner_id, variables);
        state.runs.insert(id, run.clone());
        debug!(run_id = id, "queued run");
        Ok(run)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn count_pending(&self) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Pending)
            .count())
    }

    async fn list_pending(&self) -> Result<Vec<PendingRun>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Pending)
            .map(|run| PendingRun {
                run: run.clone(),
                computation: state.computations.get(&run.computation_id).cloned(),
            })
            .collect())
    }

    async fn get(&self, run_id: RunId) -> Result<ComputationRun, StoreError> {
        let state = self.state.lock().await;
        state
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn mark_running(&self, run_id: RunId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let run = state.run_mut(run_id)?;
        if run.status != RunStatus::Pending {
            return Ok(false);
        }
        run.status = RunStatus::Running;
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_status(
        &self,
        run_id: RunId,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let run = state.run_mut(run_id)?;
        if run.status != expected {
            return Ok(false);
        }
        if !run.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                run_id,
                from: run.status,
                to: update.status,
            });
        }
        run.status = update.status;
        run.result_text = update.result_text;
        run.result_image = update.result_image;
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn requeue(
        &self,
        run_id: RunId,
        expected: RunStatus,
    ) -> Result<Option<u32>, StoreError> {
        let mut state = self.state.lock().await;
        let run = state.run_mut(run_id)?;
        if run.status != expected {
            return Ok(None);
        }
        if run.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                run_id,
                from: run.status,
                to: RunStatus::Pending,
            });
        }
        run.status = RunStatus::Pending;
        run.attempts += 1;
        run.updated_at = Utc::now();
        Ok(Some(run.attempts))
    }
}

#[async_trait]
impl DatasetProvider for MemoryStore {
    async fn resolve(&self, source: RunSource) -> Result<ResolvedSource, StoreError> {
        let state = self.state.lock().await;
        let (dataset, request) = state.source_records(source)?;

        if dataset.filename.is_empty()
            || dataset.filename.contains(['/', '\\'])
            || dataset.filename == ".."
            || dataset.filename == "."
        {
            return Err(StoreError::InvalidFilename(dataset.filename));
        }

        let keys = state
            .users
            .get(&dataset.owner_id)
            .ok_or(StoreError::KeysNotFound(dataset.owner_id))?;
        let key = KeyMaterial::from_hex(&keys.salt, &keys.secure_token)?;

        Ok(ResolvedSource {
            ciphertext_path: self.data_dir.join(&dataset.filename),
            dataset,
            key,
            request,
        })
    }
}
