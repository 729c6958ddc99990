//! # Image Fix - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` (stderr + file opzionale)
//! - Caricamento della configurazione e override da CLI
//! - Dispatch dei sottocomandi verso il motore
//!
//! ## Sottocomandi:
//! - `optimize`: ottimizza uno o più file (percorso upload / on-demand)
//! - `page`: un singolo round trip del protocollo a pagine, JSON su stdout
//! - `bulk`: esegue tutte le pagine di un job con progress bar
//! - `stats`: statistiche storiche del catalogo
//! - `check`: controllo requisiti
//!
//! ## Esempio di utilizzo:
//! ```bash
//! image-fix --level high bulk --job optimize /srv/uploads
//! image-fix page --job optimize /srv/uploads --cursor '{"page_number":2,...}'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use image_fix_engine::json_output::{JsonMessage, Requirements};
use image_fix_engine::progress::{OptimizationStats, ProgressManager};
use image_fix_engine::{
    BackupStore, BatchCoordinator, BatchCursor, Config, DirectoryCatalog, ImageProcessor, JobKind,
    OptimizationLevel, OptimizationPolicy, TaskOptimizer,
};

#[derive(Parser)]
#[command(name = "image-fix")]
#[command(about = "Policy-driven image optimization with backups and resumable bulk runs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Optimization level: low, balanced, high
    #[arg(short, long, global = true)]
    level: Option<String>,

    /// Keep EXIF/ICC/comments in re-encoded files
    #[arg(long, global = true)]
    preserve_metadata: bool,

    /// Use the full-featured codec back-end
    #[arg(long, global = true)]
    alternate_codec: bool,

    /// Do not back up originals
    #[arg(long, global = true)]
    no_backup: bool,

    /// Backup directory (default: <directory>/image-fix-backups)
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// Number of parallel workers inside a page
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize single files in place
    Optimize {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Media directory whose catalog records the results (default: directory of the first file)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Process one page of a bulk job and print the JSON response
    Page {
        #[arg(long, value_enum, default_value = "optimize")]
        job: JobKind,

        directory: PathBuf,

        /// Cursor returned as `next_cursor` by the previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Start at this page of a new run (ignored with --cursor)
        #[arg(long, conflicts_with = "cursor")]
        page: Option<u64>,
    },

    /// Run every page of a bulk job
    Bulk {
        #[arg(long, value_enum, default_value = "optimize")]
        job: JobKind,

        directory: PathBuf,
    },

    /// Show historical catalog statistics
    Stats { directory: PathBuf },

    /// Check codec availability and backup directory
    Check { directory: PathBuf },
}

impl Command {
    /// Directory the backup store and log file are resolved against
    fn root(&self) -> PathBuf {
        match self {
            Command::Optimize { root: Some(root), .. } => root.clone(),
            Command::Optimize { files, root: None } => files
                .first()
                .and_then(|f| f.parent())
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Command::Page { directory, .. }
            | Command::Bulk { directory, .. }
            | Command::Stats { directory }
            | Command::Check { directory } => directory.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).await?;
    let root = args.command.root();
    init_logging(args.verbose, config.log_file_for(&root).as_deref())?;

    match args.command {
        Command::Optimize { ref files, .. } => optimize_files(&config, &root, files).await,
        Command::Page {
            job,
            ref directory,
            ref cursor,
            page,
        } => run_single_page(&config, job, directory, cursor.as_deref(), page).await,
        Command::Bulk { job, ref directory } => run_bulk(&config, job, directory).await,
        Command::Stats { ref directory } => show_stats(&config, directory).await,
        Command::Check { ref directory } => check_requirements(&config, directory),
    }
}

/// Config file, then CLI overrides
async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path).await?,
        None => Config::default(),
    };

    if let Some(ref level) = args.level {
        config.optimization_level = OptimizationLevel::parse_lossy(level);
    }
    if args.preserve_metadata {
        config.preserve_exif = true;
    }
    if args.alternate_codec {
        config.use_alternate_codec = true;
    }
    if args.no_backup {
        config.backup_images = false;
    }
    if let Some(ref backup_dir) = args.backup_dir {
        config.backup_dir = Some(backup_dir.clone());
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    config.validate()?;
    Ok(config)
}

/// Logs go to stderr (stdout carries JSON) and, when enabled, to the log file
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn task_optimizer(config: &Config, root: &Path, need_backups: bool) -> Result<TaskOptimizer> {
    let backups = if need_backups {
        Some(BackupStore::new(config.backup_dir_for(root))?)
    } else {
        None
    };
    Ok(TaskOptimizer::new(ImageProcessor::from_config(config), backups))
}

async fn open_coordinator(
    config: &Config,
    job: JobKind,
    directory: &Path,
) -> Result<BatchCoordinator<DirectoryCatalog>> {
    if !directory.is_dir() {
        return Err(anyhow::anyhow!("Media directory does not exist: {}", directory.display()));
    }

    let need_backups = config.backup_images || job == JobKind::Restore;
    let task = task_optimizer(config, directory, need_backups)?;
    let catalog = DirectoryCatalog::open(
        directory,
        &config.state_dir()?,
        vec![config.backup_dir_for(directory)],
    )
    .await?;

    Ok(BatchCoordinator::new(catalog, task, config.workers))
}

async fn optimize_files(config: &Config, root: &Path, files: &[PathBuf]) -> Result<()> {
    let mut coordinator = open_coordinator(config, JobKind::Optimize, root).await?;
    let policy: OptimizationPolicy = config.policy();
    let mut failures = 0;

    for file in files {
        match coordinator.optimize_file(file, &policy).await {
            Ok(result) => JsonMessage::file_complete(file, result).emit(),
            Err(e) => {
                error!("Failed to optimize {}: {}", file.display(), e);
                JsonMessage::error(format!("Failed to optimize {}", file.display()), Some(e.to_string())).emit();
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow::anyhow!("{} of {} files failed", failures, files.len()));
    }
    Ok(())
}

async fn run_single_page(
    config: &Config,
    job: JobKind,
    directory: &Path,
    cursor: Option<&str>,
    page: Option<u64>,
) -> Result<()> {
    let cursor = match cursor {
        Some(json) => serde_json::from_str::<BatchCursor>(json).context("Invalid --cursor JSON")?,
        None => BatchCursor::at_page(page.unwrap_or(1), config.page_size),
    };

    let mut coordinator = open_coordinator(config, job, directory).await?;
    let response = coordinator.run_page(job, &cursor, &config.policy()).await?;
    JsonMessage::Page(response).emit();
    Ok(())
}

async fn run_bulk(config: &Config, job: JobKind, directory: &Path) -> Result<()> {
    let start_time = Instant::now();
    let policy = config.policy();
    let mut coordinator = open_coordinator(config, job, directory).await?;

    info!("Starting {} run in: {}", job, directory.display());
    info!(
        "Policy: level {}, preserve metadata {}, alternate codec {}, backup {}",
        policy.level, policy.preserve_metadata, policy.use_alternate_codec, policy.backup_original
    );

    let progress = ProgressManager::new(0);
    let mut stats = OptimizationStats::new();
    let mut cursor = BatchCursor::first(config.page_size);

    loop {
        let page = coordinator.run_page(job, &cursor, &policy).await?;
        progress.set_total(page.cursor.total_candidates as u64);
        for result in &page.results {
            stats.add_result(result);
            progress.update(result);
        }
        if page.completed {
            break;
        }
        cursor = page.next_cursor;
    }

    progress.finish(&stats.format_summary());
    if stats.errors > 0 {
        warn!("{} items failed, see the log for details", stats.errors);
    }

    let historical = coordinator.catalog().stats();
    info!("=== {} complete ===", job);
    info!("{}", stats.format_summary());
    info!(
        "Catalog: {} optimized of {} images, {} saved overall",
        historical.optimized_count,
        historical.total_assets,
        image_fix_engine::file_manager::FileManager::format_signed_size(historical.total_saved_bytes)
    );

    JsonMessage::complete(&stats, start_time.elapsed().as_secs_f64(), historical).emit();
    Ok(())
}

async fn show_stats(config: &Config, directory: &Path) -> Result<()> {
    let catalog = DirectoryCatalog::open(
        directory,
        &config.state_dir()?,
        vec![config.backup_dir_for(directory)],
    )
    .await?;
    JsonMessage::Stats(catalog.stats()).emit();
    Ok(())
}

fn check_requirements(config: &Config, directory: &Path) -> Result<()> {
    let requirements = Requirements::check(&config.backup_dir_for(directory));
    if !requirements.enhanced_codec {
        warn!("Enhanced codec not compiled in, the baseline back-end will be used");
    }
    let satisfied = requirements.is_satisfied();
    JsonMessage::Requirements(requirements).emit();

    if !satisfied {
        return Err(anyhow::anyhow!("Backup directory is not writable"));
    }
    Ok(())
}
