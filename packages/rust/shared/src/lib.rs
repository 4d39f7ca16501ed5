//! Shared types, error model, and configuration for diplomagen.
//!
//! This crate is the foundation depended on by all other diplomagen crates.
//! It provides:
//! - [`DiplomaGenError`]: the unified error type
//! - Domain types ([`TaskId`], [`NormalizedRecord`], [`Batch`], [`TaskEvent`], ...)
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, PipelineConfig, PipelineSection, RenderSection, RetentionConfig,
    RetentionSection, StorageSection, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, resolve_workers,
};
pub use error::{DiplomaGenError, Result};
pub use types::{
    Batch, BatchOutcome, BlobKind, FragmentResult, NormalizedRecord, ProgressEvent, TaskEvent,
    TaskId, TerminalEvent, TerminalState,
};
