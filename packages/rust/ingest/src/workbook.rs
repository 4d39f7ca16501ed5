//! XLSX source workbook loading.
//!
//! The source workbook carries three named sheets:
//! - `Raw Data`: one graduate per row, codes instead of display text
//! - `Term & Date Lookup`: term code → conferral date text
//! - `Degree & Major Lookup`: code → display text, shared by degree, major and honor
//!
//! Every sheet has a header row, which is dropped here.

use std::io::Cursor;

use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use tracing::debug;

use diplomagen_shared::{DiplomaGenError, Result};

pub const RAW_SHEET: &str = "Raw Data";
pub const TERM_SHEET: &str = "Term & Date Lookup";
pub const CODE_SHEET: &str = "Degree & Major Lookup";

/// One sheet row as trimmed text cells, indexed from column A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based row number in the sheet, for diagnostics.
    pub number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn new(number: usize, cells: Vec<String>) -> Self {
        Self { number, cells }
    }

    /// Cell text at `col`, or `""` when the row is shorter.
    pub fn cell(&self, col: usize) -> &str {
        self.cells.get(col).map(String::as_str).unwrap_or("")
    }
}

/// The three input sheets, header rows removed.
#[derive(Debug, Clone, Default)]
pub struct SourceWorkbook {
    pub raw: Vec<SheetRow>,
    pub terms: Vec<SheetRow>,
    pub codes: Vec<SheetRow>,
}

/// Read the source sheets out of XLSX (or XLS/ODS) bytes.
pub fn load_workbook(bytes: &[u8]) -> Result<SourceWorkbook> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DiplomaGenError::spreadsheet(format!("cannot open workbook: {e}")))?;

    let mut sheet = |name: &str| -> Result<Vec<SheetRow>> {
        let range = workbook.worksheet_range(name).map_err(|e| {
            DiplomaGenError::spreadsheet(format!("cannot read sheet '{name}': {e}"))
        })?;
        let rows = range_rows(&range);
        debug!(sheet = name, rows = rows.len(), "read sheet");
        Ok(rows)
    };

    Ok(SourceWorkbook {
        raw: sheet(RAW_SHEET)?,
        terms: sheet(TERM_SHEET)?,
        codes: sheet(CODE_SHEET)?,
    })
}

/// Flatten a calamine range into rows anchored at column A, header dropped.
///
/// A range starts at its first non-empty cell, so leading empty columns and
/// rows are re-inserted to keep the fixed column layout addressable.
fn range_rows(range: &Range<Data>) -> Vec<SheetRow> {
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let lead = start_col as usize;

    range
        .rows()
        .enumerate()
        .skip(1)
        .map(|(offset, row)| {
            let mut cells = vec![String::new(); lead];
            cells.extend(row.iter().map(cell_text));
            SheetRow::new(start_row as usize + offset + 1, cells)
        })
        .collect()
}

/// Render a cell as trimmed text. Whole floats lose their `.0`, and date
/// cells are written as ISO dates so the date parser accepts them.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        other => other.to_string().trim().to_string(),
    }
}
