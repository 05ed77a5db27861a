//! TTL-based cleanup for expired records.
//!
//! Reads already hide expired records; the `TtlReaper` reclaims their space
//! and index entries. It runs as a background task, sweeping on a fixed
//! interval through the store's ordinary `reap` mutation path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::key;
use super::RecordStore;

/// Floor for the sweep interval; `tokio::time::interval` panics on zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records deleted.
    pub removed: usize,
    /// Keys that faulted and were left for a later sweep.
    pub skipped: usize,
}

/// Background task for cleaning up expired records.
pub struct TtlReaper {
    store: Arc<dyn RecordStore>,
    interval: Duration,
    batch_size: usize,
}

impl TtlReaper {
    /// Create a new TTL reaper sweeping every 30 seconds in batches of 100.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }

    /// Set custom sweep interval. Zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set how many keys are reaped before yielding to other tasks.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Spawn the reaper as a background task.
    ///
    /// The task stops between two complete reaps once the handle signals it.
    pub fn spawn(self) -> ReaperHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                interval_secs = self.interval.as_secs(),
                batch_size = self.batch_size,
                "TTL reaper started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.sweep(Some(&cancel_rx)).await;
                        if report.removed > 0 || report.skipped > 0 {
                            info!(
                                removed = report.removed,
                                skipped = report.skipped,
                                "TTL reaper swept expired records"
                            );
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
                if *cancel_rx.borrow() {
                    break;
                }
            }
            info!("TTL reaper stopped");
        });

        ReaperHandle {
            cancel: cancel_tx,
            task,
        }
    }

    /// Run one sweep (for testing or manual invocation).
    pub async fn run_once(&self) -> SweepReport {
        self.sweep(None).await
    }

    async fn sweep(&self, cancel: Option<&watch::Receiver<bool>>) -> SweepReport {
        let mut report = SweepReport::default();

        loop {
            let keys = match self.store.expired_keys(self.batch_size).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "TTL reaper failed to list expired records");
                    break;
                }
            };
            let batch_len = keys.len();
            let mut removed_in_batch = 0;

            for storage_key in keys {
                if cancel.is_some_and(|rx| *rx.borrow()) {
                    return report;
                }

                let (partition_key, sort_key) = match key::decode(&storage_key) {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(key = %storage_key, error = %e, "TTL reaper skipped record");
                        report.skipped += 1;
                        continue;
                    }
                };

                match self.store.reap(&partition_key, &sort_key).await {
                    Ok(true) => {
                        removed_in_batch += 1;
                        debug!(
                            partition_key = %partition_key,
                            sort_key = %sort_key,
                            "TTL reaper removed record"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            partition_key = %partition_key,
                            sort_key = %sort_key,
                            error = %e,
                            "TTL reaper skipped record"
                        );
                        report.skipped += 1;
                    }
                }
            }
            report.removed += removed_in_batch;

            // A short batch means the backlog is drained; a batch with no
            // removals would only return the same faulty keys again.
            if batch_len < self.batch_size || removed_in_batch == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        report
    }
}

/// Handle to a running reaper task. Dropping it also stops the reaper.
pub struct ReaperHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop after its current reap.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "TTL reaper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
