//! The normalized output sheet.
//!
//! `Normalize` writes this table to the blob store and `Render` reads it back,
//! so both stages agree on one fixed header layout.

use serde::{Deserialize, Serialize};

use diplomagen_shared::{DiplomaGenError, NormalizedRecord, Result};

use crate::normalize::RecordFields;

pub const OUTPUT_HEADERS: [&str; 5] = ["Full Name", "Degree", "Major", "Honor", "Date"];

/// Header row plus one text row per normalized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl NormalizedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DiplomaGenError::Encoding(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DiplomaGenError::Encoding(e.to_string()))
    }
}

/// Build the output sheet for `records`, dates in ISO form.
pub fn output_table(records: &[NormalizedRecord]) -> NormalizedTable {
    NormalizedTable {
        headers: OUTPUT_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows: records
            .iter()
            .map(|r| {
                vec![
                    r.full_name.clone(),
                    r.degree.clone(),
                    r.major.clone(),
                    r.honor.clone(),
                    r.date.format("%Y-%m-%d").to_string(),
                ]
            })
            .collect(),
    }
}

fn cell(row: &[String], i: usize) -> &str {
    row.get(i).map(String::as_str).unwrap_or("")
}

/// Read records back out of a stored table.
///
/// Columns are located by header name. Rows that no longer validate are
/// skipped the same way `normalize` skips them.
pub fn records_from_table(table: &NormalizedTable) -> Result<Vec<NormalizedRecord>> {
    let column = |name: &str| -> Result<usize> {
        table
            .headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DiplomaGenError::validation(format!("normalized table lacks '{name}' column")))
    };
    let [name, degree, major, honor, date] = [
        column(OUTPUT_HEADERS[0])?,
        column(OUTPUT_HEADERS[1])?,
        column(OUTPUT_HEADERS[2])?,
        column(OUTPUT_HEADERS[3])?,
        column(OUTPUT_HEADERS[4])?,
    ];

    let records = table
        .rows
        .iter()
        .filter_map(|row| {
            RecordFields {
                full_name: cell(row, name),
                degree: cell(row, degree),
                major: cell(row, major),
                honor: cell(row, honor),
                date: cell(row, date),
            }
            .validate()
            .ok()
        })
        .collect();

    Ok(records)
}
