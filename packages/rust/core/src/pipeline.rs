//! End-to-end diploma pipeline: source workbook → normalized table → artifact.
//!
//! [`Pipeline::normalize`] and [`Pipeline::render`] are the two stage entry
//! points; [`Pipeline::run`] drives both for one task and ends it with exactly
//! one terminal event.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use diplomagen_ingest::{NormalizedTable, load_workbook, normalize, output_table, records_from_table};
use diplomagen_render::Renderer;
use diplomagen_shared::{
    BlobKind, DiplomaGenError, PipelineConfig, Result, TaskId, TerminalState,
};
use diplomagen_storage::Storage;

use crate::merge::OrderedMerge;
use crate::partition::partition;
use crate::task::{Task, TaskRegistry};
use crate::workers::WorkerPool;

const NORMALIZED_FILE_NAME: &str = "normalized.json";

// Render progress band.
const RENDER_START: u8 = 60;
const RENDER_END: u8 = 80;

/// What `normalize` produced.
#[derive(Debug, Clone)]
pub struct NormalizeSummary {
    pub rows_read: usize,
    pub records: usize,
    pub rejected: usize,
}

/// What `render` produced.
#[derive(Debug, Clone)]
pub struct RenderSummary {
    pub records: usize,
    pub batches: usize,
    /// Outcomes collected; equals `batches` on success.
    pub outcomes: usize,
    pub bytes: usize,
    pub sha256: String,
    pub elapsed: std::time::Duration,
}

/// Runs tasks against one blob store and one renderer.
pub struct Pipeline {
    storage: Arc<Storage>,
    renderer: Arc<dyn Renderer>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        storage: Arc<Storage>,
        renderer: Arc<dyn Renderer>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            renderer,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Accept a source upload: store it, register a task, and start the run
    /// in the background.
    pub async fn submit(
        self: &Arc<Self>,
        registry: &TaskRegistry,
        file_name: &str,
        source: &[u8],
    ) -> Result<Arc<Task>> {
        let id = TaskId::generate();
        self.storage
            .put_blob(&id, BlobKind::Source, file_name, source)
            .await?;

        let task = registry.create(id);
        info!(task_id = %task.id(), file = file_name, bytes = source.len(), "task submitted");

        let pipeline = Arc::clone(self);
        let run_task = Arc::clone(&task);
        tokio::spawn(async move {
            pipeline.run(run_task).await;
        });
        Ok(task)
    }

    /// Run both stages and end the task.
    #[instrument(skip_all, fields(task_id = %task.id()))]
    pub async fn run(&self, task: Arc<Task>) -> TerminalState {
        let result = self.stages(&task).await;
        self.conclude(&task, result).await
    }

    async fn stages(&self, task: &Task) -> Result<RenderSummary> {
        self.normalize(task).await?;
        self.render(task, self.config.batch_size).await
    }

    /// Map a stage result to the task's terminal state and send it.
    pub async fn conclude(&self, task: &Task, result: Result<RenderSummary>) -> TerminalState {
        let (state, message) = match result {
            Ok(summary) => {
                info!(
                    task_id = %task.id(),
                    records = summary.records,
                    batches = summary.batches,
                    bytes = summary.bytes,
                    sha256 = %summary.sha256,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "task succeeded"
                );
                (TerminalState::Succeeded, None)
            }
            Err(e) if e.is_cancellation() || task.is_cancelled() => {
                warn!(task_id = %task.id(), "task cancelled");
                (TerminalState::Cancelled, Some(e.to_string()))
            }
            Err(e) => {
                error!(task_id = %task.id(), error = %e, "task failed");
                (TerminalState::Failed, Some(e.to_string()))
            }
        };
        task.finish(state, message).await;
        state
    }

    /// Read the source workbook, join it against its lookups, and store the
    /// normalized table.
    #[instrument(skip_all, fields(task_id = %task.id()))]
    pub async fn normalize(&self, task: &Task) -> Result<NormalizeSummary> {
        let cancel = task.cancellation();
        let progress = task.progress();

        progress.emit("Opening spreadsheet", 10).await?;
        let source = cancellable(cancel, self.storage.require_blob(task.id(), BlobKind::Source)).await?;

        progress.emit("Reading rows", 20).await?;
        let workbook = blocking(cancel, move || load_workbook(&source)).await?;

        progress.emit("Processing data", 30).await?;
        let normalized = blocking(cancel, move || Ok(normalize(&workbook))).await?;

        let summary = NormalizeSummary {
            rows_read: normalized.rows_read,
            records: normalized.records.len(),
            rejected: normalized.rejected.len(),
        };
        let table = output_table(&normalized.records).to_json()?;
        cancellable(
            cancel,
            self.storage
                .put_blob(task.id(), BlobKind::Normalized, NORMALIZED_FILE_NAME, &table),
        )
        .await?;

        info!(
            rows = summary.rows_read,
            records = summary.records,
            rejected = summary.rejected,
            "normalized source"
        );
        progress.emit("Data processing completed", 50).await?;
        Ok(summary)
    }

    /// Render the stored normalized table in batches and store the merged
    /// artifact. Any failed batch fails the whole stage.
    #[instrument(skip_all, fields(task_id = %task.id(), batch_size = batch_size))]
    pub async fn render(&self, task: &Task, batch_size: usize) -> Result<RenderSummary> {
        let start = Instant::now();
        let cancel = task.cancellation();
        let progress = task.progress();

        progress.emit("Starting document generation", RENDER_START).await?;
        let stored = cancellable(cancel, self.storage.require_blob(task.id(), BlobKind::Normalized)).await?;
        let records = records_from_table(&NormalizedTable::from_json(&stored)?)?;
        if records.is_empty() {
            return Err(DiplomaGenError::validation("no valid records to render"));
        }
        let record_count = records.len();

        let batches = partition(records, batch_size)?;
        let batch_count = batches.len();
        let pool = WorkerPool::new(Arc::clone(&self.renderer), self.config.workers);
        let mut dispatch = pool.dispatch(batches, cancel);
        let mut merge = OrderedMerge::new(batch_count);

        while !merge.is_complete() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = dispatch.next() => outcome,
            };
            let Some(outcome) = next else {
                break;
            };
            merge.insert(outcome)?;

            let pct = render_percent(merge.received(), batch_count);
            if pct > progress.last() {
                progress.emit("Rendering batches", pct).await?;
            }
        }
        dispatch.join().await;

        if cancel.is_cancelled() {
            return Err(DiplomaGenError::Cancelled);
        }
        let outcomes = merge.received();
        let artifact = merge.finish()?;

        progress.emit("Saving to final document", RENDER_END).await?;
        let sha256 = format!("{:x}", Sha256::digest(&artifact));
        let file_name = format!("{}.txt", task.id());
        cancellable(
            cancel,
            self.storage
                .put_blob(task.id(), BlobKind::Output, &file_name, &artifact),
        )
        .await?;

        progress.emit("Document generation completed", 100).await?;
        Ok(RenderSummary {
            records: record_count,
            batches: batch_count,
            outcomes,
            bytes: artifact.len(),
            sha256,
            elapsed: start.elapsed(),
        })
    }
}

/// Percentage inside the render band after `done` of `total` outcomes.
fn render_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return RENDER_START;
    }
    let span = usize::from(RENDER_END - RENDER_START);
    RENDER_START + (span * done / total) as u8
}

/// Await `fut` unless the task is cancelled first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiplomaGenError::Cancelled),
        result = fut => result,
    }
}

/// Run workbook parsing off the async runtime, abandoning it on cancellation.
async fn blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    let joined = cancellable(cancel, async { Ok(handle.await) }).await?;
    joined.map_err(|e| DiplomaGenError::spreadsheet(format!("workbook processing panicked: {e}")))?
}
