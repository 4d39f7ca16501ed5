//! Record Normalizer for diplomagen.
//!
//! Turns an uploaded source workbook into an ordered list of
//! [`NormalizedRecord`](diplomagen_shared::NormalizedRecord)s:
//! - [`workbook`] reads the three source sheets with `calamine`
//! - [`normalize`](mod@normalize) joins raw rows against the lookup sheets
//! - [`table`] is the normalized output sheet stored between pipeline stages

pub mod normalize;
pub mod table;
pub mod workbook;

pub use normalize::{
    CodeLookup, Field, LookupMaps, Normalized, RejectReason, RowRejection, TermLookup, normalize,
    parse_date,
};
pub use table::{NormalizedTable, OUTPUT_HEADERS, output_table, records_from_table};
pub use workbook::{CODE_SHEET, RAW_SHEET, SheetRow, SourceWorkbook, TERM_SHEET, load_workbook};
