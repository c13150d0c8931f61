//! Integration tests for vaultrun
//!
//! These tests drive real shell scripts from `tests/fixtures/scripts` through
//! the full pipeline, so they need a Unix system with `sh` and `awk`.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vaultrun::codec::{self, KeyMaterial};
use vaultrun::config::Config;
use vaultrun::store::{MemoryStore, RunStore, StoreSnapshot, UserKeys};
use vaultrun::types::{
    AccessRequest, ComputationDefinition, ComputationRun, Dataset, RequestStatus, ReturnKind,
    RunId,
};
use vaultrun::{Dispatcher, DispatchSummary};

mod access;
mod config_loading;
mod isolation;
mod pipeline;
mod retries;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Dataset owned by user 1 that anyone may run computations on
pub(crate) const OPEN_DATASET: u64 = 1;
/// Dataset owned by user 1 that needs a granted request
pub(crate) const PROTECTED_DATASET: u64 = 2;
/// Dataset owned by user 2 that anyone may run computations on
pub(crate) const OTHER_DATASET: u64 = 3;

pub(crate) const GRANTED_REQUEST: u64 = 10;
pub(crate) const PENDING_REQUEST: u64 = 11;
pub(crate) const DENIED_REQUEST: u64 = 12;

/// Build a computation that runs a fixture script with `sh`
pub(crate) fn script_computation(
    id: u64,
    script: &str,
    args: &str,
    return_kind: ReturnKind,
) -> ComputationDefinition {
    ComputationDefinition {
        id,
        name: script.to_string(),
        description: format!("runs {script}"),
        command: format!("sh \"{FIXTURES_PATH}/scripts/{script}\" {args}"),
        return_kind,
        number_of_variables: 1,
        active: true,
        limits: None,
    }
}

pub(crate) fn owner_key(owner: u64) -> KeyMaterial {
    KeyMaterial::new([owner as u8; 16], [0x40 + owner as u8; 32])
}

/// A data directory, a store over it, and a dispatcher
pub(crate) struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new(computations: Vec<ComputationDefinition>) -> Self {
        Self::with_runs(computations, Vec::new()).await
    }

    /// Start with runs that were queued upstream, bypassing creation checks
    pub async fn with_runs(
        computations: Vec<ComputationDefinition>,
        runs: Vec<ComputationRun>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("datasets");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("work"))
            .await
            .unwrap();

        write_dataset(&data_dir, "open.csv", b"value\n3.2\n5.2\n", 1).await;
        write_dataset(&data_dir, "protected.csv", b"value\n1.0\n2.0\n", 1).await;
        write_dataset(&data_dir, "other.csv", b"value\n10.0\n20.0\n", 2).await;

        let snapshot = StoreSnapshot {
            computations,
            datasets: vec![
                dataset(OPEN_DATASET, 1, "open.csv", false),
                dataset(PROTECTED_DATASET, 1, "protected.csv", true),
                dataset(OTHER_DATASET, 2, "other.csv", false),
            ],
            requests: vec![
                request(GRANTED_REQUEST, 3, RequestStatus::Granted),
                request(PENDING_REQUEST, 4, RequestStatus::Pending),
                request(DENIED_REQUEST, 5, RequestStatus::Denied),
            ],
            users: [1, 2]
                .into_iter()
                .map(|user_id| {
                    let (salt, secure_token) = owner_key(user_id).to_hex();
                    UserKeys {
                        user_id,
                        salt,
                        secure_token,
                    }
                })
                .collect(),
            runs,
        };
        let store = Arc::new(MemoryStore::from_snapshot(snapshot, &data_dir));

        let mut config = Config::with_data_dir(&data_dir);
        config.work_dir = Some(dir.path().join("work"));
        config.dispatch.max_attempts = 3;
        config.execution.limits = config.execution.limits.with_timeout(20.0);
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), store.clone(), config));

        Self {
            dir,
            store,
            dispatcher,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("datasets")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub async fn round(&self) -> DispatchSummary {
        self.dispatcher.dispatch_round().await.unwrap()
    }

    pub async fn run(&self, id: RunId) -> ComputationRun {
        self.store.get(id).await.unwrap()
    }

    /// Names of files left in the working copy directory
    pub fn leftover_working_copies(&self) -> Vec<String> {
        std::fs::read_dir(self.work_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

async fn write_dataset(data_dir: &Path, name: &str, plaintext: &[u8], owner: u64) {
    let blob = codec::encrypt(plaintext, &owner_key(owner)).unwrap();
    tokio::fs::write(data_dir.join(name), blob).await.unwrap();
}

fn dataset(id: u64, owner_id: u64, filename: &str, requires_permission: bool) -> Dataset {
    Dataset {
        id,
        owner_id,
        filename: filename.to_string(),
        requires_permission,
    }
}

fn request(id: u64, requester_id: u64, status: RequestStatus) -> AccessRequest {
    AccessRequest {
        id,
        dataset_id: PROTECTED_DATASET,
        requester_id,
        owner_id: 1,
        status,
    }
}
