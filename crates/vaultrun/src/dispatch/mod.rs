//! Dispatcher
//!
//! Runs every pending computation through the pipeline: access check, claim,
//! decrypt, bind, execute, interpret, persist. Each run is its own task; the
//! number of tasks executing at once is bounded by a semaphore.

use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::binder::{BindError, Bindings, CommandTemplate};
use crate::codec::{self, CodecError};
use crate::config::Config;
use crate::executor::{ExecuteError, ScriptExecutor, ScriptOutcome};
use crate::gate;
use crate::interpreter;
use crate::state::{
    RUN_FAILED_MESSAGE, RUN_RETRIES_EXHAUSTED_MESSAGE, RUN_TIMED_OUT_MESSAGE, RunStatus,
    RunUpdate,
};
use crate::store::{DatasetProvider, PendingRun, RunStore, StoreError};
use crate::types::RunId;

/// Errors that interrupt a single run
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    #[error("execute error: {0}")]
    Execute(#[from] ExecuteError),

    #[error("worker pool closed")]
    PoolClosed,
}

impl DispatchError {
    /// Whether the run should go back to `Pending` and be retried later.
    ///
    /// Template errors and a program that does not exist are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Bind(_) => false,
            DispatchError::Execute(ExecuteError::Spawn { source, .. }) => {
                source.kind() != io::ErrorKind::NotFound
            }
            _ => true,
        }
    }
}

/// What happened to one run during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reached `Success`
    Succeeded,
    /// Reached `Error`
    Failed,
    /// Returned to `Pending` after a transient failure
    Requeued,
    /// Claimed or changed by someone else first
    Skipped,
}

/// Counts for one dispatch round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub requeued: usize,
    pub skipped: usize,
    /// Tasks whose final status could not be written
    pub errored: usize,
    pub panicked: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.requeued + self.skipped + self.errored + self.panicked
    }

    /// Add another round's counts to this one
    pub fn merge(&mut self, other: &DispatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.panicked += other.panicked;
    }

    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Succeeded => self.succeeded += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Requeued => self.requeued += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }
}

/// Runs pending computations against their datasets
pub struct Dispatcher {
    runs: Arc<dyn RunStore>,
    datasets: Arc<dyn DatasetProvider>,
    config: Config,
    executor: ScriptExecutor,
    /// Limits how many runs execute at once
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(runs: Arc<dyn RunStore>, datasets: Arc<dyn DatasetProvider>, config: Config) -> Self {
        let executor = ScriptExecutor::new(&config.execution);
        let semaphore = Arc::new(Semaphore::new(config.dispatch.max_concurrency.max(1)));
        Self {
            runs,
            datasets,
            config,
            executor,
            semaphore,
        }
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of worker slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Process every run that is pending right now and wait for all of them.
    ///
    /// A failure or panic in one run's task is logged and counted; it never
    /// stops the other runs in the round. A run whose task panicked while
    /// holding it is put back to `Pending` and counts as a failed attempt.
    #[instrument(skip(self))]
    pub async fn dispatch_round(self: &Arc<Self>) -> Result<DispatchSummary, DispatchError> {
        let pending = self.runs.list_pending().await?;
        if pending.is_empty() {
            debug!("no pending runs");
            return Ok(DispatchSummary::default());
        }
        info!(count = pending.len(), "dispatching pending runs");

        let mut tasks = JoinSet::new();
        let mut task_runs = HashMap::with_capacity(pending.len());
        for run in pending {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DispatchError::PoolClosed)?;
            let run_id = run.run.id;
            let this = Arc::clone(self);
            let handle = tasks.spawn(async move {
                let result = this.process(run).await;
                drop(permit);
                result
            });
            task_runs.insert(handle.id(), run_id);
        }

        let mut summary = DispatchSummary::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(disposition))) => summary.record(disposition),
                Ok((_, Err(e))) => {
                    warn!(error = %e, "could not record run result");
                    summary.errored += 1;
                }
                Err(e) => {
                    summary.panicked += 1;
                    let Some(&run_id) = task_runs.get(&e.id()) else {
                        error!(error = %e, "run task panicked");
                        continue;
                    };
                    error!(run_id, error = %e, "run task panicked");
                    if let Err(e) = self.retry_later(run_id, RunStatus::Running, &e).await {
                        warn!(run_id, error = %e, "could not recover run after panic");
                    }
                }
            }
        }

        info!(?summary, "dispatch round finished");
        Ok(summary)
    }

    /// Carry one run to a terminal state or back to `Pending`
    ///
    /// `pending` may be stale: every write expects the run to still be in the
    /// status this task last saw, and a run that has moved on is skipped.
    #[instrument(skip(self, pending), fields(run_id = pending.run.id))]
    pub async fn process(&self, pending: PendingRun) -> Result<Disposition, StoreError> {
        let run_id = pending.run.id;
        let mut held = RunStatus::Pending;
        match self.execute_run(pending, &mut held).await {
            Ok(disposition) => Ok(disposition),
            Err(e) if e.is_transient() => self.retry_later(run_id, held, &e).await,
            Err(e) => {
                warn!(error = %e, "run cannot be executed");
                self.finish(run_id, held, RunUpdate::error(RUN_FAILED_MESSAGE))
                    .await
            }
        }
    }

    async fn execute_run(
        &self,
        pending: PendingRun,
        held: &mut RunStatus,
    ) -> Result<Disposition, DispatchError> {
        let PendingRun { run, computation } = pending;

        let Some(computation) = computation else {
            warn!(computation_id = run.computation_id, "computation definition is missing");
            return Ok(self
                .finish(run.id, *held, RunUpdate::error(RUN_FAILED_MESSAGE))
                .await?);
        };

        let source = self.datasets.resolve(run.source).await?;
        if let Err(denial) =
            gate::authorize(source.request.as_ref(), Some(&source.dataset), run.runner_id)
        {
            info!(%denial, "run denied at dispatch");
            return Ok(self
                .finish(run.id, *held, RunUpdate::error(denial.to_string()))
                .await?);
        }

        if !self.runs.mark_running(run.id).await? {
            debug!("run already claimed");
            return Ok(Disposition::Skipped);
        }
        *held = RunStatus::Running;
        info!(
            computation = %computation.name,
            dataset_id = source.dataset.id,
            "run started"
        );

        let template = CommandTemplate::parse(&computation.command)?;
        let copy = codec::decrypt_to_working_copy(
            &source.ciphertext_path,
            self.config.working_copy_dir(),
            run.id,
            &source.key,
        )
        .await?;

        let command = template.bind(&Bindings {
            dataset_file: copy.path(),
            variables: &run.variables,
            user_id: source.dataset.owner_id,
        });
        let limits = self.config.effective_limits(computation.limits.as_ref());
        let outcome = self.executor.run(&command, &limits).await;

        if let Err(e) = copy.remove().await {
            warn!(error = %e, "failed to remove working copy");
        }

        let update = match outcome? {
            ScriptOutcome::Output(output) => interpreter::interpret(computation.return_kind, &output),
            ScriptOutcome::Empty => RunUpdate::error(""),
            ScriptOutcome::Failed { exit_code, stderr } => {
                debug!(?exit_code, %stderr, "script exited unsuccessfully");
                RunUpdate::error(RUN_FAILED_MESSAGE)
            }
            ScriptOutcome::TimedOut(timeout) => {
                warn!(?timeout, "script timed out");
                RunUpdate::error(RUN_TIMED_OUT_MESSAGE)
            }
            ScriptOutcome::OutputLimitExceeded { limit } => {
                warn!(limit, "script output exceeded limit");
                RunUpdate::error(RUN_FAILED_MESSAGE)
            }
        };

        Ok(self.finish(run.id, *held, update).await?)
    }

    async fn finish(
        &self,
        run_id: RunId,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<Disposition, StoreError> {
        let disposition = if update.status == RunStatus::Success {
            Disposition::Succeeded
        } else {
            Disposition::Failed
        };
        let status = update.status;
        if !self.runs.set_status(run_id, expected, update).await? {
            debug!(run_id, %expected, "run changed underneath, result dropped");
            return Ok(Disposition::Skipped);
        }
        info!(run_id, %status, "run finished");
        Ok(disposition)
    }

    async fn retry_later(
        &self,
        run_id: RunId,
        expected: RunStatus,
        cause: &(dyn Display + Sync),
    ) -> Result<Disposition, StoreError> {
        let Some(attempts) = self.runs.requeue(run_id, expected).await? else {
            debug!(run_id, %expected, "run changed underneath, not requeued");
            return Ok(Disposition::Skipped);
        };
        if attempts >= self.config.dispatch.max_attempts {
            warn!(run_id, attempts, error = %cause, "giving up on run");
            return self
                .finish(
                    run_id,
                    RunStatus::Pending,
                    RunUpdate::error(RUN_RETRIES_EXHAUSTED_MESSAGE),
                )
                .await;
        }
        warn!(run_id, attempts, error = %cause, "run will be retried");
        Ok(Disposition::Requeued)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}
