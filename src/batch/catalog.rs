//! # Asset Catalog
//!
//! Sorgente ordinata dei candidati per il protocollo a pagine.
//!
//! L'ordine è quello degli id persistiti (ordine di inserimento), mai quello
//! del filesystem al momento della chiamata. Un asset è candidato per il job J
//! nel run R se è ancora idoneo per J oppure se è già stato gestito da (J, R):
//! così l'insieme non si restringe mentre il run marca gli asset e la
//! paginazione a offset non salta né ripete elementi.

use super::JobKind;
use crate::error::OptimizeError;
use crate::file_manager::FileManager;
use crate::image_processor::OptimizationResult;
use crate::state::{CatalogStats, JobStamp, StateManager};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A candidate handed to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: u64,
    pub path: PathBuf,
}

/// Ordered, persisted collection of assets
pub trait AssetCatalog: Send {
    /// Called once, on the first page of a run
    fn begin_run(&mut self, _job: JobKind, _run_id: u64) {}

    /// Candidates for `job` in run `run_id`, in stable id order
    fn candidates(&self, job: JobKind, run_id: u64) -> Vec<CatalogEntry>;

    /// Entry of a single file, registering it when it belongs to the catalog
    fn entry_for(&mut self, path: &Path) -> Option<CatalogEntry>;

    /// Record a successful outcome
    fn record(
        &mut self,
        entry: &CatalogEntry,
        job: JobKind,
        run_id: Option<u64>,
        result: &OptimizationResult,
    ) -> Result<(), OptimizeError>;

    /// Persist recorded outcomes
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Catalog of every image below a directory
pub struct DirectoryCatalog {
    root: PathBuf,
    excluded: Vec<PathBuf>,
    state: StateManager,
}

impl DirectoryCatalog {
    /// Open the catalog of `root` and register newly discovered images.
    ///
    /// Directories in `excluded` (the backup store) are never scanned.
    pub async fn open(root: &Path, state_dir: &Path, excluded: Vec<PathBuf>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Media directory not accessible: {}", root.display()))?;
        let excluded = excluded
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .collect();

        let state = StateManager::new(&root, state_dir).await?;
        let mut catalog = Self { root, excluded, state };
        catalog.refresh().await?;
        Ok(catalog)
    }

    /// Register images that appeared since the last scan. Returns how many.
    pub async fn refresh(&mut self) -> Result<usize> {
        let root = self.root.clone();
        let excluded = self.excluded.clone();
        let files = tokio::task::spawn_blocking(move || FileManager::find_image_files(&root, &excluded)).await?;

        let known = self.state.records().len();
        for path in &files {
            self.state.register(path);
        }
        let added = self.state.records().len() - known;
        if added > 0 {
            info!("Catalog {}: {} new images", self.root.display(), added);
        }
        Ok(added)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> CatalogStats {
        self.state.get_stats()
    }
}

impl AssetCatalog for DirectoryCatalog {
    fn begin_run(&mut self, job: JobKind, run_id: u64) {
        debug!("Starting {} run {} on {}", job, run_id, self.root.display());
        self.state.cleanup();
    }

    fn candidates(&self, job: JobKind, run_id: u64) -> Vec<CatalogEntry> {
        self.state
            .records()
            .into_iter()
            .filter(|r| r.is_candidate(job, run_id))
            .map(|r| CatalogEntry {
                id: r.id,
                path: r.path.clone(),
            })
            .collect()
    }

    fn entry_for(&mut self, path: &Path) -> Option<CatalogEntry> {
        let path = path.canonicalize().ok()?;
        let inside = path.starts_with(&self.root) && !self.excluded.iter().any(|x| path.starts_with(x));
        if !inside || !FileManager::is_image(&path) {
            return None;
        }
        let id = self.state.register(&path);
        Some(CatalogEntry { id, path })
    }

    fn record(
        &mut self,
        entry: &CatalogEntry,
        job: JobKind,
        run_id: Option<u64>,
        result: &OptimizationResult,
    ) -> Result<(), OptimizeError> {
        let stamp = run_id.map(|run_id| JobStamp { job, run_id });
        match job {
            JobKind::Optimize => self.state.mark_optimized(
                &entry.path,
                result.original_size_bytes,
                result.optimized_size_bytes,
                stamp,
            ),
            JobKind::Restore => self.state.mark_restored(&entry.path, stamp),
            JobKind::ConvertWebp => self.state.mark_webp_converted(&entry.path, stamp),
        }
    }

    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.state.save()
    }
}
