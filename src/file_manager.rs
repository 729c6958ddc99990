//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file e la discovery delle immagini.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di immagini candidate in una directory
//! - Rilevamento formato dal CONTENUTO del file (magic bytes), mai dall'estensione
//! - Sostituzione atomica dei file (temp file + rename)
//! - Utilità per dimensioni e percentuali
//!
//! ## Formati supportati:
//! - **Immagini**: JPEG, PNG, GIF
//!
//! ## Sicurezza operazioni:
//! - Il file ottimizzato viene scritto in un temp file nella stessa directory
//!   e poi rinominato sopra l'originale: nessuno osserva mai un file scritto a metà
//! - In caso di errore l'originale resta intatto
//!
//! ## Esempio:
//! ```rust,ignore
//! let asset = ImageAsset::resolve(&path).await?;
//! if asset.format.is_supported() {
//!     // optimize
//! }
//! ```

use crate::error::OptimizeError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Number of leading bytes needed to sniff the supported formats
const SNIFF_LEN: usize = 16;

/// Image format decided once from file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Unsupported,
}

impl ImageFormat {
    /// Detect the format from the leading bytes of a file
    pub fn sniff(head: &[u8]) -> Self {
        match image::guess_format(head) {
            Ok(image::ImageFormat::Jpeg) => Self::Jpeg,
            Ok(image::ImageFormat::Png) => Self::Png,
            Ok(image::ImageFormat::Gif) => Self::Gif,
            _ => Self::Unsupported,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// An image resolved immediately before optimization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub size_bytes: u64,
}

impl ImageAsset {
    /// Stat the file and sniff its format from content
    pub async fn resolve(path: &Path) -> Result<Self, OptimizeError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::resolve_blocking(&owned))
            .await
            .map_err(|e| OptimizeError::Io(std::io::Error::other(e)))?
    }

    fn resolve_blocking(path: &Path) -> Result<Self, OptimizeError> {
        let mut file = std::fs::File::open(path)?;
        let size_bytes = file.metadata()?.len();

        let mut head = Vec::with_capacity(SNIFF_LEN);
        Read::by_ref(&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head)?;

        Ok(Self {
            path: path.to_path_buf(),
            format: ImageFormat::sniff(&head),
            size_bytes,
        })
    }
}

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Find all candidate images under a directory, sorted by path.
    ///
    /// Directories listed in `excluded` (e.g. the backup store) are not entered.
    pub fn find_image_files(root: &Path, excluded: &[PathBuf]) -> Vec<PathBuf> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !excluded.iter().any(|x| e.path() == x.as_path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| Self::is_image(p))
            .collect()
    }

    /// Cheap pre-filter by extension; the real format is sniffed later
    pub fn is_image(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            matches!(ext_lower.as_str(), "jpg" | "jpeg" | "jpe" | "png" | "gif")
        } else {
            false
        }
    }

    /// Atomically replace `target` with `bytes`.
    ///
    /// The data goes to a temp file in the same directory which is then renamed
    /// over the target, keeping the target's permissions.
    pub fn replace_file(target: &Path, bytes: &[u8]) -> Result<(), OptimizeError> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;

        if let Ok(metadata) = std::fs::metadata(target) {
            std::fs::set_permissions(temp.path(), metadata.permissions())?;
        }

        temp.persist(target).map_err(|e| OptimizeError::Io(e.error))?;
        Ok(())
    }

    /// Async wrapper around [`FileManager::replace_file`]
    pub async fn replace_file_async(target: &Path, bytes: Vec<u8>) -> Result<(), OptimizeError> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || Self::replace_file(&target, &bytes))
            .await
            .map_err(|e| OptimizeError::Io(std::io::Error::other(e)))?
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Format a signed byte delta ("-1.20 KB" when the file grew)
    pub fn format_signed_size(delta: i64) -> String {
        if delta < 0 {
            format!("-{}", Self::format_size(delta.unsigned_abs()))
        } else {
            Self::format_size(delta as u64)
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sniff_formats() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), ImageFormat::Jpeg);
        assert_eq!(
            ImageFormat::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            ImageFormat::Png
        );
        assert_eq!(ImageFormat::sniff(b"GIF89a\x01\x00"), ImageFormat::Gif);
        assert_eq!(ImageFormat::sniff(b"hello world"), ImageFormat::Unsupported);
        assert_eq!(ImageFormat::sniff(&[]), ImageFormat::Unsupported);
    }

    #[tokio::test]
    async fn test_resolve_ignores_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lying.jpg");
        std::fs::write(&path, b"GIF89a\x01\x00\x01\x00\x00\x00\x00;").unwrap();

        let asset = ImageAsset::resolve(&path).await.unwrap();
        assert_eq!(asset.format, ImageFormat::Gif);
        assert_eq!(asset.size_bytes, 14);
    }

    #[tokio::test]
    async fn test_resolve_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = ImageAsset::resolve(&temp_dir.path().join("nope.png")).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Io(_)));
    }

    #[test]
    fn test_find_image_files_sorted_and_excluding() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let backups = root.join("backups");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(root.join("b.png"), b"x").unwrap();
        std::fs::write(root.join("a.JPG"), b"x").unwrap();
        std::fs::write(root.join("notes.txt"), b"x").unwrap();
        std::fs::write(root.join("sub").join("c.gif"), b"x").unwrap();
        std::fs::write(backups.join("a.JPG"), b"x").unwrap();

        let files = FileManager::find_image_files(root, &[backups]);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "sub/c.gif"]);
    }

    #[test]
    fn test_replace_file_overwrites_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("img.png");
        std::fs::write(&path, b"old contents").unwrap();

        FileManager::replace_file(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(FileManager::format_signed_size(-2048), "-2.00 KB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(FileManager::calculate_reduction(0, 0), 0.0);
        assert_eq!(FileManager::calculate_reduction(200, 150), 25.0);
        assert!(FileManager::calculate_reduction(100, 120) < 0.0);
    }
}
