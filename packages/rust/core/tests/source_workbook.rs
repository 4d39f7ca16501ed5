//! Runs a real XLSX workbook through both stages.

use std::sync::Arc;

use rust_xlsxwriter::{Workbook, Worksheet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use diplomagen_core::{Pipeline, ProgressSink, RelayEnd, TaskRegistry, relay};
use diplomagen_ingest::{CODE_SHEET, NormalizedTable, RAW_SHEET, TERM_SHEET};
use diplomagen_render::{PAGE_BREAK, TemplateRenderer};
use diplomagen_shared::{BlobKind, PipelineConfig, Result, TaskEvent, TaskId, TerminalState};
use diplomagen_storage::Storage;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Zero-based sheet row of the raw row that has no full name.
const NAMELESS_ROW: u32 = 101;

fn headers(sheet: &mut Worksheet, names: &[&str]) {
    for (col, name) in names.iter().enumerate() {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
}

/// `graduates` valid rows plus one nameless row after the hundredth.
/// Term codes are numeric cells; the lookup sheet stores them as text.
fn graduate_workbook(graduates: usize) -> Vec<u8> {
    let mut workbook = Workbook::new();

    let raw = workbook.add_worksheet();
    raw.set_name(RAW_SHEET).unwrap();
    headers(
        raw,
        &[
            "Student Id", "Term", "Last", "First", "Middle", "Suffix", "Full Name", "Degree",
            "Major", "Honor",
        ],
    );
    let mut row = 1u32;
    for i in 0..graduates {
        if row == NAMELESS_ROW {
            raw.write_number(row, 1, 202410.0).unwrap();
            raw.write_string(row, 7, "BS").unwrap();
            raw.write_string(row, 8, "PHYS").unwrap();
            row += 1;
        }
        raw.write_number(row, 0, i as f64).unwrap();
        raw.write_number(row, 1, 202410.0).unwrap();
        raw.write_string(row, 6, format!("Graduate {i:04}")).unwrap();
        raw.write_string(row, 7, "BS").unwrap();
        raw.write_string(row, 8, "PHYS").unwrap();
        if i % 4 == 0 {
            raw.write_string(row, 9, "CL").unwrap();
        }
        row += 1;
    }

    let terms = workbook.add_worksheet();
    terms.set_name(TERM_SHEET).unwrap();
    headers(terms, &["Term", "Code", "Conferral Date"]);
    terms.write_string(1, 0, "Spring 2024").unwrap();
    terms.write_string(1, 1, "202410").unwrap();
    terms.write_string(1, 2, "May 14, 2024").unwrap();

    let codes = workbook.add_worksheet();
    codes.set_name(CODE_SHEET).unwrap();
    headers(codes, &["Code", "Text", "Type"]);
    for (r, (code, text, kind)) in [
        ("BS", "Bachelor of Science", "degree"),
        ("PHYS", "Physics", "major"),
        ("CL", "Cum Laude", "honor"),
    ]
    .into_iter()
    .enumerate()
    {
        let r = r as u32 + 1;
        codes.write_string(r, 0, code).unwrap();
        codes.write_string(r, 1, text).unwrap();
        codes.write_string(r, 2, kind).unwrap();
    }

    workbook.save_to_buffer().unwrap()
}

struct CollectingSink {
    events: Vec<TaskEvent>,
}

impl ProgressSink for CollectingSink {
    fn send(&mut self, event: &TaskEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

async fn setup() -> (Arc<Pipeline>, TaskRegistry) {
    let db = std::env::temp_dir().join(format!("dg_workbook_{}.db", Uuid::now_v7()));
    let storage = Arc::new(Storage::open(&db).await.expect("open test db"));
    let config = PipelineConfig {
        batch_size: 100,
        workers: 4,
        progress_capacity: 64,
    };
    let renderer = Arc::new(TemplateRenderer::builtin(80).expect("builtin template"));
    let pipeline = Pipeline::new(storage, renderer, config).expect("valid pipeline");
    (Arc::new(pipeline), TaskRegistry::new(64))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn normalize_reports_skipped_rows_and_stores_the_table() {
    let (pipeline, registry) = setup().await;
    let task = registry.create(TaskId::generate());
    pipeline
        .storage()
        .put_blob(task.id(), BlobKind::Source, "graduates.xlsx", &graduate_workbook(250))
        .await
        .unwrap();

    let summary = pipeline.normalize(&task).await.expect("normalize succeeds");
    assert_eq!(summary.rows_read, 251);
    assert_eq!(summary.records, 250);
    assert_eq!(summary.rejected, 1);
    assert_eq!(task.progress().last(), 50);

    let stored = pipeline
        .storage()
        .require_blob(task.id(), BlobKind::Normalized)
        .await
        .unwrap();
    let table = NormalizedTable::from_json(&stored).unwrap();
    assert_eq!(table.len(), 250);
    assert_eq!(table.rows[100][0], "Graduate 0100");
    assert_eq!(table.rows[100][4], "2024-05-14");
}

#[tokio::test]
async fn submitted_workbook_reaches_every_checkpoint_and_keeps_page_order() {
    let (pipeline, registry) = setup().await;
    let task = pipeline
        .submit(&registry, "graduates.xlsx", &graduate_workbook(250))
        .await
        .unwrap();

    let mut sink = CollectingSink { events: Vec::new() };
    let end = relay(&task, &mut sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(end, RelayEnd::Finished(TerminalState::Succeeded));

    let percents: Vec<u8> = sink.events.iter().map(TaskEvent::progress).collect();
    assert_eq!(percents, [10, 20, 30, 50, 60, 66, 73, 80, 80, 100, 100]);

    let statuses: Vec<&str> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::Progress(p) => Some(p.status.as_str()),
            TaskEvent::Finished(_) => None,
        })
        .collect();
    assert_eq!(
        statuses,
        [
            "Opening spreadsheet",
            "Reading rows",
            "Processing data",
            "Data processing completed",
            "Starting document generation",
            "Rendering batches",
            "Rendering batches",
            "Rendering batches",
            "Saving to final document",
            "Document generation completed",
        ]
    );

    let artifact = pipeline
        .storage()
        .require_blob(task.id(), BlobKind::Output)
        .await
        .unwrap();
    let text = String::from_utf8(artifact).unwrap();
    let pages: Vec<&str> = text
        .split(PAGE_BREAK)
        .filter(|page| !page.trim().is_empty())
        .collect();
    assert_eq!(pages.len(), 250);
    for (i, page) in pages.iter().enumerate() {
        assert!(page.contains(&format!("Graduate {i:04}")), "page {i}: {page}");
        assert!(page.contains("May 14, 2024"), "page {i}: {page}");
        assert_eq!(page.contains("Cum Laude"), i % 4 == 0, "page {i}");
    }
}
