//! Lookup joins that turn raw graduate rows into [`NormalizedRecord`]s.
//!
//! Both lookup maps are built once per run. Each raw row is then resolved by
//! code lookup in input order. A row missing a required value is rejected and
//! reported, never fatal.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use diplomagen_shared::NormalizedRecord;

use crate::workbook::{SheetRow, SourceWorkbook};

// Raw Data columns
const RAW_TERM: usize = 1;
const RAW_FULL_NAME: usize = 6;
const RAW_DEGREE: usize = 7;
const RAW_MAJOR: usize = 8;
const RAW_HONOR: usize = 9;

// Term & Date Lookup columns
const TERM_NAME: usize = 0;
const TERM_CODE: usize = 1;
const TERM_DATE_TEXT: usize = 2;

// Degree & Major Lookup columns
const CODE_CODE: usize = 0;
const CODE_TEXT: usize = 1;
const CODE_TYPE: usize = 2;

/// Accepted date layouts, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A term code and the conferral date printed for it.
#[derive(Debug, Clone)]
pub struct TermLookup {
    pub name: String,
    pub code: String,
    pub date_text: String,
}

/// A degree, major or honor code and its display text.
#[derive(Debug, Clone)]
pub struct CodeLookup {
    pub code: String,
    pub text: String,
    pub code_type: String,
}

/// Both lookup tables, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct LookupMaps {
    terms: HashMap<String, TermLookup>,
    codes: HashMap<String, CodeLookup>,
}

/// A required record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FullName,
    Degree,
    Major,
    Date,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::FullName => "Full Name",
            Self::Degree => "Degree",
            Self::Major => "Major",
            Self::Date => "Date",
        })
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingField(Field),
    InvalidDate(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing '{field}'"),
            Self::InvalidDate(text) => write!(f, "invalid date format: {text}"),
        }
    }
}

/// A dropped row and the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// 1-based sheet row number.
    pub row: usize,
    pub reason: RejectReason,
}

/// Result of normalizing one workbook.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// Raw data rows examined (header excluded).
    pub rows_read: usize,
    /// Accepted records, in input order.
    pub records: Vec<NormalizedRecord>,
    pub rejected: Vec<RowRejection>,
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl LookupMaps {
    /// Build both maps from the lookup sheets. Later rows win on duplicate codes.
    pub fn build(terms: &[SheetRow], codes: &[SheetRow]) -> Self {
        let terms = terms
            .iter()
            .map(|row| TermLookup {
                name: row.cell(TERM_NAME).to_string(),
                code: row.cell(TERM_CODE).to_string(),
                date_text: row.cell(TERM_DATE_TEXT).to_string(),
            })
            .filter(|t| !t.code.is_empty())
            .map(|t| (t.code.clone(), t))
            .collect();

        let codes = codes
            .iter()
            .map(|row| CodeLookup {
                code: row.cell(CODE_CODE).to_string(),
                text: row.cell(CODE_TEXT).to_string(),
                code_type: row.cell(CODE_TYPE).to_string(),
            })
            .filter(|c| !c.code.is_empty())
            .map(|c| (c.code.clone(), c))
            .collect();

        Self { terms, codes }
    }

    /// Date text for a term code; empty when the code is unknown.
    pub fn term_date(&self, code: &str) -> &str {
        self.terms
            .get(code)
            .map(|t| t.date_text.as_str())
            .unwrap_or("")
    }

    /// Display text for a degree/major/honor code; empty when unknown.
    pub fn text(&self, code: &str) -> &str {
        self.codes.get(code).map(|c| c.text.as_str()).unwrap_or("")
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn code_count(&self) -> usize {
        self.codes.len()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Join every raw row against the lookups.
pub fn normalize(workbook: &SourceWorkbook) -> Normalized {
    let lookups = LookupMaps::build(&workbook.terms, &workbook.codes);
    debug!(
        terms = lookups.term_count(),
        codes = lookups.code_count(),
        "built lookup maps"
    );

    let mut out = Normalized {
        rows_read: workbook.raw.len(),
        records: Vec::with_capacity(workbook.raw.len()),
        rejected: Vec::new(),
    };

    for row in &workbook.raw {
        let fields = RecordFields {
            full_name: row.cell(RAW_FULL_NAME),
            degree: lookups.text(row.cell(RAW_DEGREE)),
            major: lookups.text(row.cell(RAW_MAJOR)),
            honor: lookups.text(row.cell(RAW_HONOR)),
            date: lookups.term_date(row.cell(RAW_TERM)),
        };

        match fields.validate() {
            Ok(record) => out.records.push(record),
            Err(reason) => {
                warn!(row = row.number, %reason, "skipping row");
                out.rejected.push(RowRejection {
                    row: row.number,
                    reason,
                });
            }
        }
    }

    out
}

/// Borrowed field values for one candidate record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordFields<'a> {
    pub full_name: &'a str,
    pub degree: &'a str,
    pub major: &'a str,
    pub honor: &'a str,
    pub date: &'a str,
}

impl RecordFields<'_> {
    /// Apply the required-field and date rules.
    pub(crate) fn validate(&self) -> Result<NormalizedRecord, RejectReason> {
        let required = [
            (Field::FullName, self.full_name),
            (Field::Degree, self.degree),
            (Field::Major, self.major),
            (Field::Date, self.date),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(RejectReason::MissingField(*field));
        }

        let date = parse_date(self.date)
            .ok_or_else(|| RejectReason::InvalidDate(self.date.trim().to_string()))?;

        Ok(NormalizedRecord {
            full_name: self.full_name.trim().to_string(),
            degree: self.degree.trim().to_string(),
            major: self.major.trim().to_string(),
            honor: self.honor.trim().to_string(),
            date,
        })
    }
}

/// Parse a date using the first accepted layout that matches.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}
