//! # Batch Module
//!
//! Protocollo di elaborazione a pagine, separato in sottomoduli:
//! - `cursor`: Stato del cursore posseduto dal chiamante tra una pagina e l'altra
//! - `catalog`: Insieme ordinato dei candidati e persistenza degli esiti
//! - `task_optimizer`: Esecuzione di un singolo job su un singolo asset
//! - `coordinator`: `run_page(job, cursor, policy)`

pub mod catalog;
pub mod coordinator;
pub mod cursor;
pub mod task_optimizer;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use catalog::{AssetCatalog, CatalogEntry, DirectoryCatalog};
pub use coordinator::{BatchCoordinator, PageResponse};
pub use cursor::BatchCursor;
pub use task_optimizer::TaskOptimizer;

/// Kind of bulk job driven through the page protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Optimize,
    Restore,
    #[serde(rename = "webp")]
    #[value(name = "webp")]
    ConvertWebp,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimize => "optimize",
            Self::Restore => "restore",
            Self::ConvertWebp => "webp",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
