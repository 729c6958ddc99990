//! # Error Types Module
//!
//! Questo modulo definisce i tipi di errore del motore di ottimizzazione.
//!
//! ## Categorie di errori:
//! - `Io`: file non leggibile, directory di backup/output non scrivibile
//! - `Codec`: decode/encode fallito (file corrotto, errore della libreria)
//! - `UnsupportedFormat`: contenuto non riconosciuto come JPEG/PNG/GIF
//! - `State`: errori del catalogo persistito
//! - `Validation`: parametri di input non validi (cursor, config) o backup
//!   appartenente a un altro file
//!
//! Un livello di policy sconosciuto NON è un errore: viene normalizzato
//! a `Balanced` (vedi `policy`).
//!
//! ## Esempio:
//! ```rust,ignore
//! if asset.format == ImageFormat::Unsupported {
//!     return Err(OptimizeError::UnsupportedFormat(asset.path.display().to_string()));
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Custom error types for image optimization
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Codecs only ever run over in-memory buffers, so even an `IoError` from
/// `image` means a truncated or corrupt stream.
impl From<image::ImageError> for OptimizeError {
    fn from(err: image::ImageError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Stable error category reported per item in a batch page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Codec,
    UnsupportedFormat,
    State,
    Validation,
}

impl OptimizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Codec(_) => ErrorKind::Codec,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::State(_) => ErrorKind::State,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}
