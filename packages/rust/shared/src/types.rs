//! Core domain types for diplomagen tasks, records and progress events.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Opaque task identifier. Generated ids are UUID v7 (time-sortable), but any
/// string handed to the registry is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// BlobKind
// ---------------------------------------------------------------------------

/// What a stored blob holds for its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    /// The uploaded source workbook.
    Source,
    /// The normalized output table produced by `Normalize`.
    Normalized,
    /// The final merged artifact produced by `Render`.
    Output,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Normalized => "normalized",
            Self::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(Self::Source),
            "normalized" => Some(Self::Normalized),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records and batches
// ---------------------------------------------------------------------------

/// One graduate row after the lookup joins. Only rows with every required
/// field present and a parseable date become a `NormalizedRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub full_name: String,
    pub degree: String,
    pub major: String,
    /// Empty when the row carries no honor.
    #[serde(default)]
    pub honor: String,
    pub date: NaiveDate,
}

/// A contiguous, index-tagged slice of normalized records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 0-based position of this batch in the original sequence.
    pub index: usize,
    pub records: Vec<NormalizedRecord>,
}

/// Exactly one of these is produced for every dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub result: FragmentResult,
}

/// Rendered bytes for a batch, or the reason it could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentResult {
    Success(Vec<u8>),
    Failure(String),
}

impl BatchOutcome {
    pub fn success(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            index,
            result: FragmentResult::Success(bytes),
        }
    }

    pub fn failure(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            result: FragmentResult::Failure(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, FragmentResult::Success(_))
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// A status/percent update. This is the wire shape relayed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: String,
    /// 0..=100, non-decreasing over one task run.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Succeeded,
    Failed,
    Cancelled,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal marker: always the last event of a task's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub state: TerminalState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One item on a task's progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress(ProgressEvent),
    Finished(TerminalEvent),
}

impl TaskEvent {
    pub fn progress(&self) -> u8 {
        match self {
            Self::Progress(p) => p.progress,
            Self::Finished(t) => t.progress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}
