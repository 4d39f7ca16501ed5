//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use diplomagen_core::{
    Pipeline, ProgressSink, RelayEnd, RetentionSweeper, SseSink, TaskRegistry, relay,
};
use diplomagen_render::{Renderer, TemplateRenderer};
use diplomagen_shared::{
    AppConfig, BlobKind, PipelineConfig, RetentionConfig, TaskEvent, TerminalState, expand_home,
    init_config, load_config, resolve_workers,
};
use diplomagen_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// diplomagen: batch diploma generation from a graduate spreadsheet.
#[derive(Parser)]
#[command(
    name = "diplomagen",
    version,
    about = "Generate one merged diploma document from a graduate spreadsheet.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Normalize a source workbook and render every graduate's diploma.
    Generate {
        /// Source workbook (.xlsx) with Raw Data and lookup sheets.
        input: PathBuf,

        /// Where to write the merged document (defaults to <input>.txt).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Records per render batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Render workers (0 = one per CPU).
        #[arg(long)]
        workers: Option<usize>,

        /// Page template file (defaults to the built-in template).
        #[arg(long)]
        template: Option<PathBuf>,

        /// Blob database path.
        #[arg(long, env = "DIPLOMAGEN_DB")]
        db: Option<PathBuf>,

        /// Write progress to stdout as server-sent events instead of a bar.
        #[arg(long)]
        sse: bool,
    },

    /// Delete stored blobs older than the retention window.
    Sweep {
        /// Blob database path.
        #[arg(long, env = "DIPLOMAGEN_DB")]
        db: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// free for SSE output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "diplomagen=info",
        1 => "diplomagen=debug",
        _ => "diplomagen=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            input,
            out,
            batch_size,
            workers,
            template,
            db,
            sse,
        } => {
            let args = GenerateArgs {
                input,
                out,
                batch_size,
                workers,
                template,
                db,
                sse,
            };
            cmd_generate(args).await
        }
        Command::Sweep { db } => cmd_sweep(db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

struct GenerateArgs {
    input: PathBuf,
    out: Option<PathBuf>,
    batch_size: Option<usize>,
    workers: Option<usize>,
    template: Option<PathBuf>,
    db: Option<PathBuf>,
    sse: bool,
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let config = load_config()?;

    let mut pipeline_config = PipelineConfig::from(&config);
    if let Some(batch_size) = args.batch_size {
        pipeline_config.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        pipeline_config.workers = resolve_workers(workers);
    }

    let storage = Arc::new(open_storage(&config, args.db.as_deref()).await?);
    let renderer = load_renderer(&config, args.template.as_deref())?;

    let source = tokio::fs::read(&args.input)
        .await
        .wrap_err_with(|| format!("cannot read {}", args.input.display()))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "source.xlsx".to_string());

    let registry = TaskRegistry::new(pipeline_config.progress_capacity);
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&storage),
        renderer,
        pipeline_config.clone(),
    )?);

    info!(
        input = %args.input.display(),
        batch_size = pipeline_config.batch_size,
        workers = pipeline_config.workers,
        "generating diplomas"
    );
    let task = pipeline.submit(&registry, &file_name, &source).await?;

    // Ctrl-C withdraws the consumer; the relay then cancels the task.
    let disconnected = CancellationToken::new();
    {
        let disconnected = disconnected.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                disconnected.cancel();
            }
        });
    }

    let mut bar = BarSink::new(!args.sse);
    let end = if args.sse {
        let mut sink = SseSink::new(std::io::stdout());
        relay(&task, &mut sink, &disconnected).await?
    } else {
        relay(&task, &mut bar, &disconnected).await?
    };

    let state = match end {
        RelayEnd::Finished(state) => state,
        RelayEnd::Disconnected => {
            bar.abandon("interrupted");
            match tokio::time::timeout(Duration::from_secs(10), task.wait()).await {
                Ok(state) => state,
                Err(_) => {
                    warn!(task_id = %task.id(), "task did not stop in time");
                    TerminalState::Cancelled
                }
            }
        }
    };

    if state != TerminalState::Succeeded {
        let reason = task.error().unwrap_or_else(|| state.to_string());
        return Err(eyre!("diploma generation {state}: {reason}"));
    }

    let artifact = storage.require_blob(task.id(), BlobKind::Output).await?;
    let out = args
        .out
        .unwrap_or_else(|| args.input.with_extension("txt"));
    tokio::fs::write(&out, &artifact)
        .await
        .wrap_err_with(|| format!("cannot write {}", out.display()))?;

    if !args.sse {
        println!();
        println!("  Diplomas generated!");
        println!("  Task:   {}", task.id());
        println!("  Bytes:  {}", artifact.len());
        println!("  Output: {}", out.display());
        if let Some(finished) = task.finished_at() {
            let elapsed = finished - task.started_at();
            println!("  Time:   {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
        }
        println!();
    }

    Ok(())
}

async fn cmd_sweep(db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let storage = Arc::new(open_storage(&config, db).await?);
    let sweeper = RetentionSweeper::new(
        Arc::new(TaskRegistry::default()),
        storage,
        RetentionConfig::from(&config),
    )?;
    let report = sweeper.sweep_once(chrono::Utc::now()).await?;
    println!("Deleted {} expired blob(s).", report.blobs_deleted);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig, db: Option<&Path>) -> Result<Storage> {
    let path = match db {
        Some(p) => p.to_path_buf(),
        None => expand_home(&config.storage.db_path)?,
    };
    Ok(Storage::open(&path).await?)
}

fn load_renderer(config: &AppConfig, template: Option<&Path>) -> Result<Arc<dyn Renderer>> {
    let width = config.render.page_width;
    let configured = config.render.template_path.as_deref().map(expand_home).transpose()?;
    let renderer = match template.map(Path::to_path_buf).or(configured) {
        Some(path) => TemplateRenderer::from_file(&path, width)?,
        None => TemplateRenderer::builtin(width)?,
    };
    Ok(Arc::new(renderer))
}

// ---------------------------------------------------------------------------
// CLI progress sink
// ---------------------------------------------------------------------------

/// Relays task progress onto an indicatif bar.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn abandon(&self, message: &str) {
        if !self.bar.is_finished() {
            self.bar.abandon_with_message(message.to_string());
        }
    }
}

impl ProgressSink for BarSink {
    fn send(&mut self, event: &TaskEvent) -> diplomagen_shared::Result<()> {
        match event {
            TaskEvent::Progress(p) => {
                self.bar.set_position(u64::from(p.progress));
                self.bar.set_message(p.status.clone());
            }
            TaskEvent::Finished(t) => {
                self.bar.set_position(u64::from(t.progress));
                match t.state {
                    TerminalState::Succeeded => self.bar.finish_with_message("done"),
                    state => self.bar.abandon_with_message(state.to_string()),
                }
            }
        }
        Ok(())
    }
}
