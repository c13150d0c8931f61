//! Recurring dispatch trigger
//!
//! The scheduler waits on a [`Ticker`], checks whether any runs are pending,
//! and if so starts a dispatch round in the background. A slow round never
//! delays the next tick, so rounds may overlap; the dispatcher's claim step
//! keeps each run from executing twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, DispatchSummary, Dispatcher};

/// Source of scheduler ticks
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. Returns `None` once no more ticks will come.
    async fn tick(&mut self) -> Option<()>;
}

/// Ticks on a fixed period, starting one period from now
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Option<()> {
        self.interval.tick().await;
        Some(())
    }
}

/// Ticks whenever a message arrives; ends when every sender is dropped
#[derive(Debug)]
pub struct ChannelTicker {
    rx: mpsc::Receiver<()>,
}

impl ChannelTicker {
    /// Create a ticker and the sender that drives it
    pub fn channel(buffer: usize) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Totals over a scheduler's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: usize,
    /// Ticks that found nothing pending
    pub idle_ticks: usize,
    pub rounds: usize,
    /// Rounds that failed before processing any run
    pub failed_rounds: usize,
    /// Per-run results summed over all rounds
    pub runs: DispatchSummary,
}

impl SchedulerStats {
    fn record(&mut self, round: Result<Result<DispatchSummary, DispatchError>, JoinError>) {
        match round {
            Ok(Ok(summary)) => self.runs.merge(&summary),
            Ok(Err(e)) => {
                warn!(error = %e, "dispatch round failed");
                self.failed_rounds += 1;
            }
            Err(e) => {
                error!(error = %e, "dispatch round panicked");
                self.failed_rounds += 1;
            }
        }
    }
}

/// Starts dispatch rounds on each tick
#[derive(Debug)]
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Start ticking in a background task
    pub fn start<T>(self, ticker: T) -> SchedulerHandle
    where
        T: Ticker + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(self.dispatcher, ticker, stop_rx));
        info!("scheduler started");
        SchedulerHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<SchedulerStats>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for in-flight rounds to finish
    pub async fn stop(self) -> Result<SchedulerStats, JoinError> {
        // The receiver only goes away once the loop has already exited
        let _ = self.stop.send(true);
        self.task.await
    }

    /// Wait for the ticker to run out and in-flight rounds to finish
    pub async fn join(self) -> Result<SchedulerStats, JoinError> {
        let SchedulerHandle { stop, task } = self;
        let stats = task.await;
        drop(stop);
        stats
    }
}

async fn run<T: Ticker>(
    dispatcher: Arc<Dispatcher>,
    mut ticker: T,
    mut stop: watch::Receiver<bool>,
) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    let mut rounds = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = async {
                let _ = stop.wait_for(|stopped| *stopped).await;
            } => break,

            tick = ticker.tick() => {
                if tick.is_none() {
                    break;
                }
                stats.ticks += 1;

                while let Some(done) = rounds.try_join_next() {
                    stats.record(done);
                }

                match dispatcher.runs().count_pending().await {
                    Ok(0) => {
                        debug!("no pending runs");
                        stats.idle_ticks += 1;
                    }
                    Ok(pending) => {
                        debug!(pending, "starting dispatch round");
                        let dispatcher = Arc::clone(&dispatcher);
                        rounds.spawn(async move { dispatcher.dispatch_round().await });
                        stats.rounds += 1;
                    }
                    Err(e) => warn!(error = %e, "failed to count pending runs"),
                }
            }
        }
    }

    debug!(in_flight = rounds.len(), "scheduler stopping");
    while let Some(done) = rounds.join_next().await {
        stats.record(done);
    }
    info!(?stats, "scheduler stopped");
    stats
}
