//! # Image Fix Engine Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Ri-codifica lossy/lossless di immagini JPEG/PNG/GIF guidata da una policy
//! - Backup una-tantum degli originali
//! - Elaborazione di grandi collezioni a pagine, ripristinabile dal chiamante
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `policy`: Policy immutabile (livello, metadata, back-end, backup)
//! - `error`: Tipi di errore custom
//! - `file_manager`: Discovery, rilevamento formato, sostituzione atomica
//! - `backup`: Backup store protetto
//! - `codec`: Back-end di re-encode (`baseline`, `enhanced`)
//! - `image_processor`: Optimizer per singolo asset
//! - `state`: Catalogo persistito degli asset
//! - `batch`: Protocollo a pagine (cursore, catalogo, coordinator)
//! - `progress` / `json_output`: Feedback per il binario
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use image_fix_engine::{BatchCoordinator, BatchCursor, Config, DirectoryCatalog, JobKind};
//!
//! let config = Config::default();
//! let mut coordinator = BatchCoordinator::new(catalog, task, config.workers);
//! let page = coordinator.run_page(JobKind::Optimize, &BatchCursor::first(config.page_size), &config.policy()).await?;
//! if !page.completed {
//!     // ask for page.next_cursor
//! }
//! ```

pub mod backup;
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod json_output;
pub mod policy;
pub mod progress;
pub mod state;

pub use backup::BackupStore;
pub use batch::{AssetCatalog, BatchCoordinator, BatchCursor, DirectoryCatalog, JobKind, PageResponse, TaskOptimizer};
pub use config::Config;
pub use error::{ErrorKind, OptimizeError};
pub use file_manager::{ImageAsset, ImageFormat};
pub use image_processor::{ImageProcessor, OptimizationResult};
pub use policy::{OptimizationLevel, OptimizationPolicy};
pub use state::{CatalogStats, StateManager};
