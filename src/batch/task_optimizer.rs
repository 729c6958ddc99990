//! # Task Optimizer Module
//!
//! Worker per un singolo job su un singolo asset: backup opzionale, poi
//! ottimizzazione, ripristino o conversione WebP.
//! Usato sia dal coordinator sia dal percorso single-file (upload / on-demand).

use super::JobKind;
use crate::backup::{BackupOutcome, BackupStore};
use crate::error::OptimizeError;
use crate::file_manager::ImageAsset;
use crate::image_processor::{ImageProcessor, OptimizationResult};
use crate::policy::OptimizationPolicy;
use std::path::Path;
use tracing::debug;

/// Per-file worker, cheap to clone into spawned tasks
#[derive(Debug, Clone)]
pub struct TaskOptimizer {
    processor: ImageProcessor,
    backups: Option<BackupStore>,
}

impl TaskOptimizer {
    pub fn new(processor: ImageProcessor, backups: Option<BackupStore>) -> Self {
        Self { processor, backups }
    }

    pub fn backups(&self) -> Option<&BackupStore> {
        self.backups.as_ref()
    }

    fn backup_store(&self) -> Result<&BackupStore, OptimizeError> {
        self.backups
            .as_ref()
            .ok_or_else(|| OptimizeError::Validation("No backup directory configured".to_string()))
    }

    /// Run `job` on one file
    pub async fn run(&self, job: JobKind, path: &Path, policy: &OptimizationPolicy) -> Result<OptimizationResult, OptimizeError> {
        match job {
            JobKind::Optimize => self.optimize_file(path, policy).await,
            JobKind::Restore => self.restore_file(path).await,
            JobKind::ConvertWebp => self.convert_file(path).await,
        }
    }

    /// Optimize one file in place, backing it up first when the policy asks.
    ///
    /// Always re-encodes, even if the file was optimized before.
    pub async fn optimize_file(&self, path: &Path, policy: &OptimizationPolicy) -> Result<OptimizationResult, OptimizeError> {
        let asset = ImageAsset::resolve(path).await?;
        if !asset.format.is_supported() {
            return Err(OptimizeError::UnsupportedFormat(format!(
                "{} is not a JPEG, PNG or GIF image",
                path.display()
            )));
        }

        if policy.backup_original {
            let outcome = self.backup_store()?.ensure_backup_async(path).await?;
            if outcome == BackupOutcome::AlreadyPresent {
                debug!("Reusing existing backup for {}", path.display());
            }
        }

        self.processor.optimize(&asset, policy).await
    }

    /// Put the backed-up original back in place
    pub async fn restore_file(&self, path: &Path) -> Result<OptimizationResult, OptimizeError> {
        let store = self.backup_store()?.clone();
        let target = path.to_path_buf();
        let (current_size, restored_size) = tokio::task::spawn_blocking(move || store.restore(&target))
            .await
            .map_err(|e| OptimizeError::Io(std::io::Error::other(e)))??;

        Ok(OptimizationResult::completed(path.to_path_buf(), current_size, restored_size))
    }

    /// Write a WebP sibling of one file
    pub async fn convert_file(&self, path: &Path) -> Result<OptimizationResult, OptimizeError> {
        let asset = ImageAsset::resolve(path).await?;
        self.processor.convert_to_webp(&asset).await
    }
}
