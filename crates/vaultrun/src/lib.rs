//! A library for running curated analysis scripts against encrypted datasets.
//!
//! Vaultrun picks up queued computation runs, checks that each one is still
//! allowed, decrypts the target dataset into a private working copy, runs the
//! computation's script with the run's parameters, and records the result.
//!
//! # Features
//!
//! - **Access gate**: Runs only proceed through a granted request or on a dataset the runner may use.
//! - **AES-256-GCM datasets**: Per-owner key material, tag-prefixed ciphertext on disk.
//! - **Scoped plaintext**: Each run decrypts into its own owner-only file that is always removed.
//! - **No shell**: Command templates are split into argv before parameters are bound.
//! - **Bounded dispatch**: A worker pool caps concurrent scripts; timeouts and output ceilings apply.
//! - **Retry ceiling**: Transient failures are retried a configurable number of times.

pub use codec::{CodecError, KeyMaterial, WorkingCopy};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use dispatch::{DispatchError, DispatchSummary, Dispatcher, Disposition};
pub use executor::{ExecuteError, ScriptExecutor, ScriptOutcome};
pub use gate::Denial;
pub use media::{MediaError, ResultImage};
pub use scheduler::{
    ChannelTicker, IntervalTicker, Scheduler, SchedulerHandle, SchedulerStats, Ticker,
};
pub use state::{RunStatus, RunUpdate};
pub use store::{
    DatasetProvider, MemoryStore, PendingRun, ResolvedSource, RunStore, StoreError, StoreSnapshot,
    UserKeys,
};
pub use types::{
    AccessRequest, ComputationDefinition, ComputationRun, Dataset, ExecutionLimits,
    RequestStatus, ReturnKind, RunSource,
};

pub mod binder;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod gate;
pub mod interpreter;
pub mod media;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;
