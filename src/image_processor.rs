//! # Image Processing Module
//!
//! Questo modulo implementa l'Optimizer: `(asset, policy) -> OptimizationResult`.
//!
//! ## Pipeline di Ottimizzazione
//!
//! 1. **Rilevamento formato**: dal contenuto del file (`ImageAsset::resolve`),
//!    mai dall'estensione o da metadati forniti dal chiamante
//! 2. **Derivazione parametri**: qualità JPEG / livello PNG dalla policy
//! 3. **Selezione back-end**: `baseline` o `enhanced` (vedi `codec`)
//! 4. **Re-encode in memoria**: in `spawn_blocking`, l'originale non viene toccato
//! 5. **Soglia**: il risultato sostituisce l'originale solo se
//!    `optimized < original * size_threshold`
//! 6. **Sostituzione atomica**: temp file + rename, mai un file scritto a metà
//!
//! ## Formati
//!
//! | Formato | Low | Balanced | High |
//! |---------|-----|----------|------|
//! | JPEG    | q90 | q82      | q75  |
//! | PNG     | 3   | 6        | 9    |
//! | GIF     | lossless / pass-through |
//!
//! ## Error Handling
//!
//! - `UnsupportedFormat`: contenuto non JPEG/PNG/GIF
//! - `Codec`: file corrotto o errore del codec, l'originale resta intatto
//! - `Io`: lettura o scrittura fallita, l'originale resta intatto
//!
//! Un risultato con `savings_bytes <= 0` NON è un errore.
//!
//! ## Esempio
//!
//! ```rust,ignore
//! let processor = ImageProcessor::new(1.0);
//! let asset = ImageAsset::resolve(Path::new("photo.jpg")).await?;
//! let result = processor.optimize(&asset, &OptimizationPolicy::default()).await?;
//! println!("saved {} bytes", result.savings_bytes);
//! ```

use crate::codec::{self, CodecBackend};
use crate::config::Config;
use crate::error::{ErrorKind, OptimizeError};
use crate::file_manager::{FileManager, ImageAsset, ImageFormat};
use crate::policy::OptimizationPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Error attached to a failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OptimizeError> for ItemError {
    fn from(err: &OptimizeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one optimize/restore/convert operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub original_size_bytes: u64,
    pub optimized_size_bytes: u64,
    /// `original - optimized`; zero or negative is a valid outcome
    pub savings_bytes: i64,
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl OptimizationResult {
    pub fn completed(output_path: PathBuf, original_size_bytes: u64, optimized_size_bytes: u64) -> Self {
        Self {
            success: true,
            original_size_bytes,
            optimized_size_bytes,
            savings_bytes: original_size_bytes as i64 - optimized_size_bytes as i64,
            output_path,
            error: None,
        }
    }

    /// A failed item: sizes are unchanged, the file was not touched
    pub fn failed(path: PathBuf, size_bytes: u64, err: &OptimizeError) -> Self {
        Self {
            success: false,
            original_size_bytes: size_bytes,
            optimized_size_bytes: size_bytes,
            savings_bytes: 0,
            output_path: path,
            error: Some(err.into()),
        }
    }

    pub fn reduction_percent(&self) -> f64 {
        FileManager::calculate_reduction(self.original_size_bytes, self.optimized_size_bytes)
    }
}

/// Optimizer for single images
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    /// Replace only if `optimized < original * size_threshold`
    size_threshold: f64,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ImageProcessor {
    pub fn new(size_threshold: f64) -> Self {
        Self { size_threshold }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.size_threshold)
    }

    /// Re-encode `source` according to `format` and `policy`. Pure, in memory.
    pub fn reencode(format: ImageFormat, source: &[u8], policy: &OptimizationPolicy) -> Result<Vec<u8>, OptimizeError> {
        let backend: &dyn CodecBackend = codec::select_backend(policy.use_alternate_codec);
        debug!("Re-encoding {:?} with {} back-end at level {}", format, backend.name(), policy.level);

        match format {
            ImageFormat::Jpeg => backend.reencode_jpeg(source, policy.level.jpeg_quality(), policy.preserve_metadata),
            ImageFormat::Png => backend.reencode_png(source, policy.level.png_compression(), policy.preserve_metadata),
            ImageFormat::Gif => backend.reencode_gif(source, policy.preserve_metadata),
            ImageFormat::Unsupported => Err(OptimizeError::UnsupportedFormat(
                "content is not JPEG, PNG or GIF".to_string(),
            )),
        }
    }

    fn should_replace(&self, original: &[u8], optimized: &[u8]) -> bool {
        original != optimized && (optimized.len() as f64) < (original.len() as f64 * self.size_threshold)
    }

    /// Optimize an asset in place
    pub async fn optimize(&self, asset: &ImageAsset, policy: &OptimizationPolicy) -> Result<OptimizationResult, OptimizeError> {
        if !asset.format.is_supported() {
            return Err(OptimizeError::UnsupportedFormat(format!(
                "{} is not a JPEG, PNG or GIF image",
                asset.path.display()
            )));
        }

        let source = tokio::fs::read(&asset.path).await?;
        let format = asset.format;
        let policy = *policy;

        let (source, optimized) = tokio::task::spawn_blocking(move || {
            let optimized = Self::reencode(format, &source, &policy);
            (source, optimized)
        })
        .await
        .map_err(|e| OptimizeError::Codec(format!("encoder task failed: {}", e)))?;
        let optimized = optimized?;

        let original_size = source.len() as u64;
        if !self.should_replace(&source, &optimized) {
            debug!(
                "Keeping original {} ({} -> {} bytes, threshold {})",
                asset.path.display(),
                original_size,
                optimized.len(),
                self.size_threshold
            );
            return Ok(OptimizationResult::completed(asset.path.clone(), original_size, original_size));
        }

        let optimized_size = optimized.len() as u64;
        FileManager::replace_file_async(&asset.path, optimized).await?;

        let result = OptimizationResult::completed(asset.path.clone(), original_size, optimized_size);
        info!(
            "Optimized {}: {} -> {} ({:.1}% saved)",
            asset.path.display(),
            FileManager::format_size(original_size),
            FileManager::format_size(optimized_size),
            result.reduction_percent()
        );
        Ok(result)
    }

    /// Resolve and optimize a path
    pub async fn optimize_path(&self, path: &Path, policy: &OptimizationPolicy) -> Result<OptimizationResult, OptimizeError> {
        let asset = ImageAsset::resolve(path).await?;
        self.optimize(&asset, policy).await
    }

    /// Sibling path of the WebP rendition (`photo.jpg` -> `photo.webp`)
    pub fn webp_path(path: &Path) -> PathBuf {
        path.with_extension("webp")
    }

    /// Write a lossless WebP rendition next to the asset. The original is untouched.
    pub async fn convert_to_webp(&self, asset: &ImageAsset) -> Result<OptimizationResult, OptimizeError> {
        match asset.format {
            ImageFormat::Jpeg | ImageFormat::Png => {}
            other => {
                return Err(OptimizeError::UnsupportedFormat(format!(
                    "{} ({:?}) cannot be converted to WebP",
                    asset.path.display(),
                    other
                )))
            }
        }

        let source = tokio::fs::read(&asset.path).await?;
        let (source, webp) = tokio::task::spawn_blocking(move || {
            let webp = codec::encode_webp_lossless(&source);
            (source, webp)
        })
        .await
        .map_err(|e| OptimizeError::Codec(format!("encoder task failed: {}", e)))?;
        let webp = webp?;

        let original_size = source.len() as u64;
        if !self.should_replace(&source, &webp) {
            debug!("WebP rendition of {} is not smaller, skipped", asset.path.display());
            return Ok(OptimizationResult::completed(asset.path.clone(), original_size, original_size));
        }

        let webp_path = Self::webp_path(&asset.path);
        let webp_size = webp.len() as u64;
        FileManager::replace_file_async(&webp_path, webp).await?;
        info!("Converted {} -> {}", asset.path.display(), webp_path.display());

        Ok(OptimizationResult::completed(webp_path, original_size, webp_size))
    }
}
