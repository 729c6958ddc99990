//! # State Management Module
//!
//! Questo modulo persiste il catalogo degli asset di una directory.
//!
//! ## Responsabilità:
//! - Assegna ad ogni immagine un id stabile, in ordine di scoperta
//! - Traccia lo stato di ogni asset (originale / ottimizzato) e le dimensioni
//! - Ricorda quale job e quale run hanno toccato l'asset per ultimo, così che
//!   l'insieme dei candidati di un run non si restringa tra una pagina e l'altra
//! - Fornisce statistiche storiche (conteggio, byte risparmiati, top savings)
//! - Cleanup delle entry per file che non esistono più
//!
//! ## Strategia di persistence:
//! - Un file JSON per directory (basato su hash del path)
//! - Salvataggio in `<state_dir>/catalog_<hash>.json`, default `~/.image-fix`
//! - Scrittura atomica (temp file + rename)
//!
//! ## Esempio struttura state file:
//! ```json
//! {
//!   "next_id": 3,
//!   "assets": {
//!     "/srv/uploads/a.jpg": {
//!       "id": 1,
//!       "path": "/srv/uploads/a.jpg",
//!       "status": { "state": "optimized", "original_size": 1048576, "optimized_size": 524288, "processed_at": 1642680000 },
//!       "webp_converted": false,
//!       "last_job": { "job": "optimize", "run_id": 1642679990000000000 }
//!     }
//!   }
//! }
//! ```

use crate::batch::JobKind;
use crate::error::OptimizeError;
use crate::file_manager::FileManager;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info};

/// How many entries `CatalogStats::top_savings` keeps
const TOP_SAVINGS_LEN: usize = 5;

/// Which job last handled an asset, and in which run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStamp {
    pub job: JobKind,
    pub run_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AssetStatus {
    Original,
    Optimized {
        original_size: u64,
        optimized_size: u64,
        processed_at: u64,
    },
}

/// One image known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: u64,
    pub path: PathBuf,
    pub status: AssetStatus,
    #[serde(default)]
    pub webp_converted: bool,
    #[serde(default)]
    pub last_job: Option<JobStamp>,
}

impl AssetRecord {
    pub fn new(id: u64, path: PathBuf) -> Self {
        Self {
            id,
            path,
            status: AssetStatus::Original,
            webp_converted: false,
            last_job: None,
        }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self.status, AssetStatus::Optimized { .. })
    }

    pub fn savings_bytes(&self) -> i64 {
        match self.status {
            AssetStatus::Optimized {
                original_size,
                optimized_size,
                ..
            } => original_size as i64 - optimized_size as i64,
            AssetStatus::Original => 0,
        }
    }

    /// Whether the asset still needs `job`
    pub fn is_eligible(&self, job: JobKind) -> bool {
        match job {
            JobKind::Optimize => !self.is_optimized(),
            JobKind::Restore => self.is_optimized(),
            JobKind::ConvertWebp => !self.webp_converted && Self::is_webp_source(&self.path),
        }
    }

    /// Candidate for `job` in run `run_id`: still eligible, or already handled by this very run
    pub fn is_candidate(&self, job: JobKind, run_id: u64) -> bool {
        self.is_eligible(job) || self.last_job == Some(JobStamp { job, run_id })
    }

    fn is_webp_source(path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                matches!(
                    ext.to_string_lossy().to_lowercase().as_str(),
                    "jpg" | "jpeg" | "jpe" | "png"
                )
            })
            .unwrap_or(false)
    }
}

/// Aggregate figures over the whole catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_assets: usize,
    pub optimized_count: usize,
    pub total_saved_bytes: i64,
    pub top_savings: Vec<(PathBuf, i64)>,
}

/// State file of one directory catalog
#[derive(Debug, Serialize, Deserialize)]
pub struct StateFile {
    pub next_id: u64,
    pub assets: HashMap<String, AssetRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            next_id: 1,
            assets: HashMap::new(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Manages the persisted catalog of a directory
pub struct StateManager {
    state_file_path: PathBuf,
    state: StateFile,
}

impl StateManager {
    /// State file name for a catalog root
    pub fn state_file_name(root: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize())[..16].to_string();
        format!("catalog_{}.json", hash)
    }

    /// Load (or start) the catalog of `root` under `state_dir`
    pub async fn new(root: &Path, state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

        let state_file_path = state_dir.join(Self::state_file_name(root));

        let state = if state_file_path.exists() {
            let content = fs::read_to_string(&state_file_path).await?;
            serde_json::from_str(&content).map_err(|e| {
                OptimizeError::State(format!("{}: {}", state_file_path.display(), e))
            })?
        } else {
            StateFile::default()
        };
        debug!("Loaded catalog state from {}", state_file_path.display());

        Ok(Self {
            state_file_path,
            state,
        })
    }

    /// Save current state to file
    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_vec_pretty(&self.state)?;
        FileManager::replace_file_async(&self.state_file_path, content)
            .await
            .with_context(|| format!("Failed to write state file {}", self.state_file_path.display()))?;
        Ok(())
    }

    /// Register a path, returning its id. Known paths keep their id.
    pub fn register(&mut self, path: &Path) -> u64 {
        if let Some(record) = self.state.assets.get(&key(path)) {
            return record.id;
        }
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state
            .assets
            .insert(key(path), AssetRecord::new(id, path.to_path_buf()));
        id
    }

    pub fn get(&self, path: &Path) -> Option<&AssetRecord> {
        self.state.assets.get(&key(path))
    }

    /// All records in id order
    pub fn records(&self) -> Vec<&AssetRecord> {
        let mut records: Vec<_> = self.state.assets.values().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn record_mut(&mut self, path: &Path) -> Result<&mut AssetRecord, OptimizeError> {
        self.state
            .assets
            .get_mut(&key(path))
            .ok_or_else(|| OptimizeError::State(format!("Unknown asset: {}", path.display())))
    }

    pub fn mark_optimized(
        &mut self,
        path: &Path,
        original_size: u64,
        optimized_size: u64,
        stamp: Option<JobStamp>,
    ) -> Result<(), OptimizeError> {
        let record = self.record_mut(path)?;
        // a forced re-optimization keeps the size seen before the first one
        let original_size = match record.status {
            AssetStatus::Optimized { original_size: first, .. } => first,
            AssetStatus::Original => original_size,
        };
        record.status = AssetStatus::Optimized {
            original_size,
            optimized_size,
            processed_at: now_secs(),
        };
        if stamp.is_some() {
            record.last_job = stamp;
        }
        Ok(())
    }

    pub fn mark_restored(&mut self, path: &Path, stamp: Option<JobStamp>) -> Result<(), OptimizeError> {
        let record = self.record_mut(path)?;
        record.status = AssetStatus::Original;
        if stamp.is_some() {
            record.last_job = stamp;
        }
        Ok(())
    }

    pub fn mark_webp_converted(&mut self, path: &Path, stamp: Option<JobStamp>) -> Result<(), OptimizeError> {
        let record = self.record_mut(path)?;
        record.webp_converted = true;
        if stamp.is_some() {
            record.last_job = stamp;
        }
        Ok(())
    }

    /// Get statistics about the catalog
    pub fn get_stats(&self) -> CatalogStats {
        let optimized: Vec<_> = self.state.assets.values().filter(|r| r.is_optimized()).collect();

        let mut top_savings: Vec<_> = optimized
            .iter()
            .map(|r| (r.path.clone(), r.savings_bytes()))
            .filter(|(_, saved)| *saved > 0)
            .collect();
        top_savings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_savings.truncate(TOP_SAVINGS_LEN);

        CatalogStats {
            total_assets: self.state.assets.len(),
            optimized_count: optimized.len(),
            total_saved_bytes: optimized.iter().map(|r| r.savings_bytes()).sum(),
            top_savings,
        }
    }

    /// Drop entries for files that no longer exist. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.state.assets.len();
        self.state.assets.retain(|_, record| record.path.exists());
        let removed = before - self.state.assets.len();
        if removed > 0 {
            info!("Removed {} stale catalog entries", removed);
        }
        removed
    }
}
