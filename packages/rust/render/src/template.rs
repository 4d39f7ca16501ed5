//! Page-template renderer.
//!
//! A template is plain text, one page per record. Placeholders `{name}`,
//! `{degree}`, `{major}`, `{honor}` and `{date}` are substituted per record.
//! A line whose placeholders all come out empty is dropped, which is how a
//! record without an honor loses its honor line. Substituted lines are
//! wrapped and centered to the page width.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use diplomagen_shared::{Batch, DiplomaGenError, NormalizedRecord, Result};

use crate::Renderer;
use crate::layout::{center, wrap};

/// Appended after every page so concatenated fragments stay page-aligned.
pub const PAGE_BREAK: char = '\u{c}';

/// Template used when no template file is configured.
pub const BUILTIN_TEMPLATE: &str = "\
{name}

has been admitted to the degree of
{degree}
{major}
{honor}

conferred {date}
";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"));

const FIELDS: [&str; 5] = ["name", "degree", "major", "honor", "date"];

/// Minimum usable page width in columns.
const MIN_WIDTH: usize = 20;

/// Renders each record onto a copy of a text page template.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    lines: Vec<String>,
    page_width: usize,
}

impl TemplateRenderer {
    /// The bundled template.
    pub fn builtin(page_width: usize) -> Result<Self> {
        Self::from_template(BUILTIN_TEMPLATE, page_width)
    }

    /// Load a template from disk. A missing file is an I/O error.
    pub fn from_file(path: &Path, page_width: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DiplomaGenError::io(path, e))?;
        debug!(path = %path.display(), "loaded page template");
        Self::from_template(&text, page_width)
    }

    /// Parse template text, rejecting unknown placeholders.
    pub fn from_template(text: &str, page_width: usize) -> Result<Self> {
        if page_width < MIN_WIDTH {
            return Err(DiplomaGenError::validation(format!(
                "page_width must be at least {MIN_WIDTH}, got {page_width}"
            )));
        }

        if let Some(unknown) = PLACEHOLDER_RE
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .find(|name| !FIELDS.contains(&name.as_str()))
        {
            return Err(DiplomaGenError::validation(format!(
                "unknown template placeholder {{{unknown}}}"
            )));
        }

        let lines: Vec<String> = text.lines().map(|l| l.trim_end().to_string()).collect();
        if !lines.iter().any(|l| PLACEHOLDER_RE.is_match(l)) {
            return Err(DiplomaGenError::validation(
                "template contains no placeholders",
            ));
        }

        Ok(Self { lines, page_width })
    }

    pub fn page_width(&self) -> usize {
        self.page_width
    }

    /// Lay out one record as one page, page break included.
    pub fn render_page(&self, record: &NormalizedRecord) -> String {
        let date = record.date.format("%B %d, %Y").to_string();
        let value = |field: &str| field_value(record, &date, field).to_string();

        let mut page = String::new();
        for line in &self.lines {
            if !PLACEHOLDER_RE.is_match(line) {
                if !line.trim().is_empty() {
                    page.push_str(&center(line.trim(), self.page_width));
                }
                page.push('\n');
                continue;
            }

            let all_empty = PLACEHOLDER_RE
                .captures_iter(line)
                .all(|c| value(&c[1]).trim().is_empty());
            if all_empty {
                continue;
            }

            let filled = PLACEHOLDER_RE.replace_all(line, |c: &Captures<'_>| value(&c[1]));
            for wrapped in wrap(&filled, self.page_width) {
                page.push_str(&center(&wrapped, self.page_width));
                page.push('\n');
            }
        }
        page.push(PAGE_BREAK);
        page
    }
}

fn field_value<'a>(record: &'a NormalizedRecord, date: &'a str, field: &str) -> &'a str {
    match field {
        "name" => &record.full_name,
        "degree" => &record.degree,
        "major" => &record.major,
        "honor" => &record.honor,
        "date" => date,
        _ => "",
    }
}

impl Renderer for TemplateRenderer {
    fn name(&self) -> &str {
        "template"
    }

    fn render(&self, batch: &Batch) -> Result<Vec<u8>> {
        let mut out = String::new();
        for record in &batch.records {
            out.push_str(&self.render_page(record));
        }
        Ok(out.into_bytes())
    }
}
