//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking del comando `bulk` e le
//! statistiche aggregate di un run.
//!
//! ## Componenti principali:
//! - `ProgressManager`: Progress bar `indicatif` sul totale dei candidati
//! - `OptimizationStats`: Statistiche cumulative costruite dai risultati delle pagine
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================================] 150/150 (100%) [OK] photo.jpg: 45.2% saved
//! ```

use crate::file_manager::FileManager;
use crate::image_processor::OptimizationResult;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar over the candidates of a run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager; the length is set once the first page reports it
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    pub fn set_total(&self, total_files: u64) {
        self.bar.set_length(total_files);
    }

    /// Advance by one result
    pub fn update(&self, result: &OptimizationResult) {
        let name = result
            .output_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy();

        let message = match &result.error {
            Some(error) => format!("[ERROR] {}: {}", name, error.message),
            None if result.savings_bytes > 0 => format!("[OK] {}: {:.1}% saved", name, result.reduction_percent()),
            None => format!("[SKIP] {}: no reduction", name),
        };

        self.bar.inc(1);
        self.bar.set_message(message);
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Statistics tracker for a run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OptimizationStats {
    pub files_processed: usize,
    pub files_optimized: usize,
    pub files_skipped: usize,
    pub total_bytes_saved: i64,
    pub total_original_size: u64,
    pub errors: usize,
}

impl OptimizationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: &OptimizationResult) {
        self.files_processed += 1;
        if !result.success {
            self.errors += 1;
            return;
        }

        self.total_original_size += result.original_size_bytes;
        self.total_bytes_saved += result.savings_bytes;
        if result.savings_bytes > 0 {
            self.files_optimized += 1;
        } else {
            self.files_skipped += 1;
        }
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_original_size > 0 {
            (self.total_bytes_saved as f64 / self.total_original_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Optimized: {} | Skipped: {} | Errors: {} | Total saved: {} ({:.2}%)",
            self.files_processed,
            self.files_optimized,
            self.files_skipped,
            self.errors,
            FileManager::format_signed_size(self.total_bytes_saved),
            self.overall_reduction_percent()
        )
    }
}
