//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON su stdout, per il
//! chiamante esterno che guida il protocollo a pagine.
//!
//! ## Tipi di messaggi:
//! - `page`: Risposta di una pagina (risultati, cursore successivo, completed)
//! - `file_complete`: Fine ottimizzazione di un singolo file
//! - `complete`: Fine di un run `bulk` con statistiche del run e storiche
//! - `requirements`: Esito del controllo requisiti
//! - `stats`: Statistiche storiche del catalogo
//! - `error`: Errore generale

use crate::backup::BackupStore;
use crate::batch::PageResponse;
use crate::codec;
use crate::image_processor::OptimizationResult;
use crate::progress::OptimizationStats;
use crate::state::CatalogStats;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Page(PageResponse),

    FileComplete {
        path: PathBuf,
        #[serde(flatten)]
        result: OptimizationResult,
        savings_human: String,
    },

    Complete {
        files_processed: usize,
        files_optimized: usize,
        files_skipped: usize,
        errors: usize,
        total_bytes_saved: i64,
        savings_human: String,
        duration_seconds: f64,
        historical_stats: CatalogStats,
    },

    Requirements(Requirements),

    Stats(CatalogStats),

    Error {
        message: String,
        details: Option<String>,
    },
}

/// Environment checks reported before a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub enhanced_codec: bool,
    pub backup_dir: PathBuf,
    pub backup_dir_writable: bool,
}

impl Requirements {
    /// Check codec availability and that the backup directory accepts files
    pub fn check(backup_dir: &Path) -> Self {
        let backup_dir_writable = BackupStore::new(backup_dir)
            .map(|store| store.is_writable())
            .unwrap_or(false);

        Self {
            enhanced_codec: codec::enhanced_available(),
            backup_dir: backup_dir.to_path_buf(),
            backup_dir_writable,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.backup_dir_writable
    }
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn file_complete(path: &Path, result: OptimizationResult) -> Self {
        Self::FileComplete {
            path: path.to_path_buf(),
            savings_human: crate::file_manager::FileManager::format_signed_size(result.savings_bytes),
            result,
        }
    }

    pub fn complete(stats: &OptimizationStats, duration_seconds: f64, historical_stats: CatalogStats) -> Self {
        Self::Complete {
            files_processed: stats.files_processed,
            files_optimized: stats.files_optimized,
            files_skipped: stats.files_skipped,
            errors: stats.errors,
            total_bytes_saved: stats.total_bytes_saved,
            savings_human: crate::file_manager::FileManager::format_signed_size(stats.total_bytes_saved),
            duration_seconds,
            historical_stats,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}
