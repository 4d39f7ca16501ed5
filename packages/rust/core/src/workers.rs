//! Worker Pool: fans batches out to concurrent render workers.
//!
//! The job queue is sized to the batch count, so dispatch never waits. Each
//! worker pulls a batch, renders it on a blocking thread, and sends exactly
//! one [`BatchOutcome`] for it, success or failure.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use diplomagen_render::Renderer;
use diplomagen_shared::{Batch, BatchOutcome};

pub struct WorkerPool {
    renderer: Arc<dyn Renderer>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(renderer: Arc<dyn Renderer>, workers: usize) -> Self {
        Self {
            renderer,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueue every batch and start the workers. Batches are not enqueued
    /// once `cancel` has fired.
    pub fn dispatch(&self, batches: Vec<Batch>, cancel: &CancellationToken) -> Dispatch {
        let expected = batches.len();
        let capacity = expected.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Batch>(capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel::<BatchOutcome>(capacity);

        let mut enqueued = 0;
        for batch in batches {
            if cancel.is_cancelled() {
                break;
            }
            if job_tx.try_send(batch).is_err() {
                break;
            }
            enqueued += 1;
        }
        // Closing the queue lets idle workers exit once it drains.
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let mut workers = JoinSet::new();
        for id in 0..self.workers.min(capacity) {
            workers.spawn(worker(
                id,
                Arc::clone(&self.renderer),
                Arc::clone(&jobs),
                outcome_tx.clone(),
                cancel.clone(),
            ));
        }

        debug!(
            batches = expected,
            enqueued,
            workers = workers.len(),
            renderer = self.renderer.name(),
            "dispatched batches"
        );

        Dispatch {
            expected,
            enqueued,
            outcomes: outcome_rx,
            workers,
        }
    }
}

/// A running fan-out: outcomes stream back in completion order.
pub struct Dispatch {
    expected: usize,
    enqueued: usize,
    outcomes: mpsc::Receiver<BatchOutcome>,
    workers: JoinSet<()>,
}

impl Dispatch {
    /// Number of batches handed to `dispatch`.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of batches actually queued.
    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    /// Next outcome, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<BatchOutcome> {
        self.outcomes.recv().await
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        self.outcomes.close();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "render worker did not exit cleanly");
            }
        }
    }
}

async fn worker(
    id: usize,
    renderer: Arc<dyn Renderer>,
    jobs: Arc<Mutex<mpsc::Receiver<Batch>>>,
    outcomes: mpsc::Sender<BatchOutcome>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                batch = jobs.recv() => batch,
            }
        };
        let Some(batch) = next else {
            break;
        };

        let index = batch.index;
        let records = batch.records.len();
        let start = Instant::now();
        let renderer = Arc::clone(&renderer);
        let handle = tokio::task::spawn_blocking(move || renderer.render(&batch));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => BatchOutcome::failure(index, "cancelled"),
            joined = handle => match joined {
                Ok(Ok(bytes)) => {
                    debug!(
                        worker = id,
                        batch = index,
                        records,
                        bytes = bytes.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "rendered batch"
                    );
                    BatchOutcome::success(index, bytes)
                }
                Ok(Err(e)) => {
                    warn!(worker = id, batch = index, error = %e, "batch failed to render");
                    BatchOutcome::failure(index, e.to_string())
                }
                Err(e) => {
                    warn!(worker = id, batch = index, error = %e, "render thread panicked");
                    BatchOutcome::failure(index, format!("renderer panicked: {e}"))
                }
            },
        };

        // The outcome channel holds one slot per batch, so this never waits.
        if outcomes.try_send(outcome).is_err() {
            debug!(worker = id, batch = index, "outcome receiver gone");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use diplomagen_shared::{DiplomaGenError, FragmentResult, NormalizedRecord, Result};

    use super::*;

    struct IndexRenderer;

    impl Renderer for IndexRenderer {
        fn name(&self) -> &str {
            "index"
        }

        fn render(&self, batch: &Batch) -> Result<Vec<u8>> {
            if batch.records.iter().any(|r| r.full_name == "fail") {
                return Err(DiplomaGenError::render("refused"));
            }
            if batch.records.iter().any(|r| r.full_name == "panic") {
                panic!("renderer bug");
            }
            Ok(batch.index.to_string().into_bytes())
        }
    }

    fn batch(index: usize, name: &str) -> Batch {
        Batch {
            index,
            records: vec![NormalizedRecord {
                full_name: name.into(),
                degree: "BA".into(),
                major: "History".into(),
                honor: String::new(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 5, 4).unwrap(),
            }],
        }
    }

    async fn drain(mut dispatch: Dispatch) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < dispatch.expected() {
            match dispatch.next().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        dispatch.join().await;
        outcomes.sort_by_key(|o| o.index);
        outcomes
    }

    #[tokio::test]
    async fn every_batch_yields_one_outcome() {
        let pool = WorkerPool::new(Arc::new(IndexRenderer), 3);
        let batches = (0..10).map(|i| batch(i, "ok")).collect();
        let outcomes = drain(pool.dispatch(batches, &CancellationToken::new())).await;

        assert_eq!(outcomes.len(), 10);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.index, i);
            assert_eq!(outcome.result, FragmentResult::Success(i.to_string().into_bytes()));
        }
    }

    #[tokio::test]
    async fn render_errors_and_panics_become_failure_outcomes() {
        let pool = WorkerPool::new(Arc::new(IndexRenderer), 2);
        let batches = vec![batch(0, "ok"), batch(1, "fail"), batch(2, "panic")];
        let outcomes = drain(pool.dispatch(batches, &CancellationToken::new())).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].result, FragmentResult::Failure("render error: refused".into()));
        assert!(matches!(&outcomes[2].result, FragmentResult::Failure(r) if r.contains("panicked")));
    }

    #[tokio::test]
    async fn cancelled_dispatch_enqueues_nothing_and_workers_exit() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = WorkerPool::new(Arc::new(IndexRenderer), 4);
        let dispatch = pool.dispatch((0..5).map(|i| batch(i, "ok")).collect(), &cancel);
        assert_eq!(dispatch.enqueued(), 0);

        tokio::time::timeout(Duration::from_secs(2), drain(dispatch))
            .await
            .expect("workers must exit");
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(WorkerPool::new(Arc::new(IndexRenderer), 0).workers(), 1);
    }
}
