//! End-to-end pipeline behaviour: ordering, failure, cancellation, progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use diplomagen_core::{Pipeline, ProgressSink, RelayEnd, Task, TaskRegistry, relay};
use diplomagen_ingest::output_table;
use diplomagen_render::Renderer;
use diplomagen_shared::{
    Batch, BlobKind, DiplomaGenError, NormalizedRecord, PipelineConfig, Result, TaskEvent, TaskId,
    TerminalState,
};
use diplomagen_storage::Storage;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One line per record. Later batches finish first, so completion order is
/// the reverse of batch order (with some jitter).
struct ScrambledRenderer {
    fail_batch: Option<usize>,
    delay_ms: u64,
}

impl Renderer for ScrambledRenderer {
    fn name(&self) -> &str {
        "scrambled"
    }

    fn render(&self, batch: &Batch) -> Result<Vec<u8>> {
        let jitter = (batch.index as u64 * 7) % 5;
        let delay = self.delay_ms.saturating_sub(batch.index as u64 * 10) + jitter;
        std::thread::sleep(Duration::from_millis(delay));

        if self.fail_batch == Some(batch.index) {
            return Err(DiplomaGenError::render("template asset missing"));
        }
        let mut out = Vec::new();
        for record in &batch.records {
            out.extend_from_slice(record.full_name.as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}

struct CollectingSink {
    events: Vec<TaskEvent>,
    accept: usize,
}

impl CollectingSink {
    fn unlimited() -> Self {
        Self {
            events: Vec::new(),
            accept: usize::MAX,
        }
    }
}

impl ProgressSink for CollectingSink {
    fn send(&mut self, event: &TaskEvent) -> Result<()> {
        if self.events.len() >= self.accept {
            return Err(DiplomaGenError::io(
                "client",
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            ));
        }
        self.events.push(event.clone());
        Ok(())
    }
}

fn records(n: usize) -> Vec<NormalizedRecord> {
    (0..n)
        .map(|i| NormalizedRecord {
            full_name: format!("Graduate {i:04}"),
            degree: "Bachelor of Science".into(),
            major: "Physics".into(),
            honor: if i % 3 == 0 { "Cum Laude".into() } else { String::new() },
            date: NaiveDate::from_ymd_opt(2024, 5, 4).unwrap(),
        })
        .collect()
}

async fn test_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("dg_pipeline_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

async fn setup(
    renderer: ScrambledRenderer,
    progress_capacity: usize,
) -> (Arc<Pipeline>, Arc<TaskRegistry>) {
    let config = PipelineConfig {
        batch_size: 100,
        workers: 4,
        progress_capacity,
    };
    let pipeline = Pipeline::new(test_storage().await, Arc::new(renderer), config.clone())
        .expect("valid pipeline");
    (Arc::new(pipeline), Arc::new(TaskRegistry::new(progress_capacity)))
}

/// Register a task whose normalized table is already stored.
async fn seeded_task(pipeline: &Pipeline, registry: &TaskRegistry, n: usize) -> Arc<Task> {
    let task = registry.create(TaskId::generate());
    let table = output_table(&records(n)).to_json().unwrap();
    pipeline
        .storage()
        .put_blob(task.id(), BlobKind::Normalized, "normalized.json", &table)
        .await
        .unwrap();
    task
}

fn spawn_render(pipeline: &Arc<Pipeline>, task: &Arc<Task>, batch_size: usize) {
    let pipeline = Arc::clone(pipeline);
    let task = Arc::clone(task);
    tokio::spawn(async move {
        let result = pipeline.render(&task, batch_size).await;
        pipeline.conclude(&task, result).await;
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_preserves_record_order_across_batches() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: None,
            delay_ms: 40,
        },
        64,
    )
    .await;
    let task = seeded_task(&pipeline, &registry, 250).await;

    let summary = pipeline.render(&task, 100).await.expect("render succeeds");
    assert_eq!(summary.records, 250);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.outcomes, 3);
    assert_eq!(summary.sha256.len(), 64);

    let artifact = pipeline
        .storage()
        .require_blob(task.id(), BlobKind::Output)
        .await
        .unwrap();
    let expected: String = (0..250).map(|i| format!("Graduate {i:04}\n")).collect();
    assert_eq!(String::from_utf8(artifact).unwrap(), expected);
    assert_eq!(summary.bytes, expected.len());
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_with_success() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: None,
            delay_ms: 5,
        },
        64,
    )
    .await;
    let task = seeded_task(&pipeline, &registry, 1000).await;
    spawn_render(&pipeline, &task, 25);

    let mut sink = CollectingSink::unlimited();
    let end = relay(&task, &mut sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(end, RelayEnd::Finished(TerminalState::Succeeded));

    let percents: Vec<u8> = sink.events.iter().map(TaskEvent::progress).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.first(), Some(&60));
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(sink.events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(sink.events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn failed_batch_fails_the_task_with_its_index() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: Some(1),
            delay_ms: 5,
        },
        64,
    )
    .await;
    let task = seeded_task(&pipeline, &registry, 250).await;
    spawn_render(&pipeline, &task, 100);

    let mut sink = CollectingSink::unlimited();
    let end = relay(&task, &mut sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(end, RelayEnd::Finished(TerminalState::Failed));

    match sink.events.last().unwrap() {
        TaskEvent::Finished(terminal) => {
            let error = terminal.error.as_deref().unwrap_or_default();
            assert!(error.contains("batch 1"), "{error}");
            assert!(terminal.progress < 100);
        }
        other => panic!("expected terminal event, got {other:?}"),
    }
    assert_eq!(task.wait().await, TerminalState::Failed);
    assert!(
        pipeline
            .storage()
            .get_blob(task.id(), BlobKind::Output)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn consumer_disconnect_after_second_event_terminates_the_run() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: None,
            delay_ms: 50,
        },
        1,
    )
    .await;
    let task = seeded_task(&pipeline, &registry, 2000).await;
    spawn_render(&pipeline, &task, 10);

    let mut sink = CollectingSink {
        events: Vec::new(),
        accept: 2,
    };
    let end = relay(&task, &mut sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(end, RelayEnd::Disconnected);
    assert_eq!(sink.events.len(), 2);

    let state = tokio::time::timeout(Duration::from_secs(10), task.wait())
        .await
        .expect("orchestrator must not hang after the consumer leaves");
    assert_eq!(state, TerminalState::Cancelled);
    assert!(task.finished_at().is_some());
}

#[tokio::test]
async fn unreadable_source_fails_the_submitted_task() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: None,
            delay_ms: 0,
        },
        64,
    )
    .await;

    let task = pipeline
        .submit(&registry, "graduates.xlsx", b"this is not a workbook")
        .await
        .unwrap();
    assert!(registry.get(task.id()).is_ok());

    let mut sink = CollectingSink::unlimited();
    let end = relay(&task, &mut sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(end, RelayEnd::Finished(TerminalState::Failed));

    match &sink.events[0] {
        TaskEvent::Progress(p) => {
            assert_eq!(p.status, "Opening spreadsheet");
            assert_eq!(p.progress, 10);
        }
        other => panic!("expected progress event, got {other:?}"),
    }
    match sink.events.last().unwrap() {
        TaskEvent::Finished(terminal) => {
            assert!(terminal.error.as_deref().unwrap_or_default().contains("spreadsheet"));
        }
        other => panic!("expected terminal event, got {other:?}"),
    }
    assert_eq!(
        pipeline
            .storage()
            .require_blob(task.id(), BlobKind::Source)
            .await
            .unwrap(),
        b"this is not a workbook"
    );
}

#[tokio::test]
async fn empty_normalized_table_fails_instead_of_writing_nothing() {
    let (pipeline, registry) = setup(
        ScrambledRenderer {
            fail_batch: None,
            delay_ms: 0,
        },
        64,
    )
    .await;
    let task = seeded_task(&pipeline, &registry, 0).await;
    let err = pipeline.render(&task, 100).await.unwrap_err();
    assert!(err.to_string().contains("no valid records"));
}
