//! Retention sweep for finished tasks and stored blobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use diplomagen_shared::{DiplomaGenError, Result, RetentionConfig};
use diplomagen_storage::Storage;

use crate::task::TaskRegistry;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks_evicted: usize,
    pub blobs_deleted: u64,
}

pub struct RetentionSweeper {
    registry: Arc<TaskRegistry>,
    storage: Arc<Storage>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<TaskRegistry>,
        storage: Arc<Storage>,
        config: RetentionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            storage,
            config,
        })
    }

    /// Evict tasks that finished more than the retention window before `now`,
    /// delete their blobs, then delete any other blob older than the window.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let window = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| DiplomaGenError::config(format!("retention window out of range: {e}")))?;
        let cutoff = now - window;

        let evicted = self.registry.evict_finished_before(cutoff);
        let mut report = SweepReport {
            tasks_evicted: evicted.len(),
            blobs_deleted: 0,
        };
        for id in &evicted {
            report.blobs_deleted += self.storage.delete_task_blobs(id).await?;
        }
        report.blobs_deleted += self.storage.delete_blobs_older_than(cutoff).await?;

        info!(
            tasks_evicted = report.tasks_evicted,
            blobs_deleted = report.blobs_deleted,
            %cutoff,
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Sweep every `sweep_interval` until `shutdown` fires. A failed sweep is
    /// logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }
}
