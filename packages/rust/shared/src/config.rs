//! Application configuration for diplomagen.
//!
//! User config lives at `~/.diplomagen/diplomagen.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DiplomaGenError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "diplomagen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".diplomagen";

// ---------------------------------------------------------------------------
// Config structs (matching diplomagen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batch/worker/progress settings.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Blob store location.
    #[serde(default)]
    pub storage: StorageSection,

    /// Retention sweep settings.
    #[serde(default)]
    pub retention: RetentionSection,

    /// Page rendering settings.
    #[serde(default)]
    pub render: RenderSection,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Maximum records per rendered batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Render workers; 0 means one per available CPU.
    #[serde(default)]
    pub workers: usize,

    /// Capacity of each task's progress channel.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: 0,
            progress_capacity: default_progress_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_progress_capacity() -> usize {
    32
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Path to the blob database. A leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.diplomagen/diplomagen.db".into()
}

/// `[retention]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSection {
    /// Finished tasks and stored blobs older than this are removed.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// How often the background sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_retention_hours() -> u64 {
    24
}
fn default_sweep_interval() -> u64 {
    3600
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSection {
    /// Optional page template file; the built-in template is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,

    /// Page width in columns used for wrapping and centering.
    #[serde(default = "default_page_width")]
    pub page_width: usize,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            template_path: None,
            page_width: default_page_width(),
        }
    }
}

fn default_page_width() -> usize {
    80
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Resolved worker count (never zero).
    pub workers: usize,
    pub progress_capacity: usize,
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DiplomaGenError::config("batch_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(DiplomaGenError::config("workers must be at least 1"));
        }
        if self.progress_capacity == 0 {
            return Err(DiplomaGenError::config(
                "progress_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.pipeline.batch_size,
            workers: resolve_workers(config.pipeline.workers),
            progress_capacity: config.pipeline.progress_capacity,
        }
    }
}

/// Map the `0 = auto` convention to a concrete worker count.
pub fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

/// Runtime retention configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl RetentionConfig {
    /// Reject settings the sweeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(DiplomaGenError::config(
                "sweep_interval_secs must be at least 1",
            ));
        }
        if chrono::Duration::from_std(self.retention).is_err() {
            return Err(DiplomaGenError::config("retention_hours is too large"));
        }
        Ok(())
    }
}

impl From<&AppConfig> for RetentionConfig {
    /// An hour count that overflows maps to `Duration::MAX`, which `validate`
    /// rejects.
    fn from(config: &AppConfig) -> Self {
        let retention = config
            .retention
            .retention_hours
            .checked_mul(3600)
            .map_or(Duration::MAX, Duration::from_secs);
        Self {
            retention,
            sweep_interval: Duration::from_secs(config.retention.sweep_interval_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.diplomagen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DiplomaGenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.diplomagen/diplomagen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DiplomaGenError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DiplomaGenError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DiplomaGenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DiplomaGenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DiplomaGenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DiplomaGenError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
