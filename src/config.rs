//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri del motore
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Costruisce la `OptimizationPolicy` immutabile passata al core
//!
//! ## Parametri di configurazione:
//! - `optimization_level`: `low` / `balanced` / `high` (default: balanced,
//!   valori sconosciuti normalizzati a balanced)
//! - `preserve_exif`: Mantiene EXIF/ICC/commenti (default: false)
//! - `use_alternate_codec`: Usa il back-end completo se compilato (default: false)
//! - `backup_images`: Backup dell'originale prima della modifica (default: true)
//! - `backup_dir`: Directory di backup (default: `<media>/image-fix-backups`)
//! - `enable_logs` / `log_file`: Log su file (default: disattivato)
//! - `page_size`: Elementi per pagina (default: 5)
//! - `workers`: Worker paralleli dentro una pagina (default: 4)
//! - `size_threshold`: Sostituisce solo se nuovo < originale * soglia (default: 1.0)
//! - `state_dir`: Directory dei file di stato (default: `~/.image-fix`)
//!
//! ## Esempio:
//! ```rust
//! # use image_fix_engine::{Config, OptimizationLevel};
//! # fn main() -> anyhow::Result<()> {
//! let config = Config {
//!     optimization_level: OptimizationLevel::High,
//!     workers: 8,
//!     ..Default::default()
//! };
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::policy::{OptimizationLevel, OptimizationPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default name of the backup directory inside a media root
pub const DEFAULT_BACKUP_DIR_NAME: &str = "image-fix-backups";
/// Default name of the log file inside the backup directory
pub const DEFAULT_LOG_FILE_NAME: &str = "image-fix.log";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub optimization_level: OptimizationLevel,
    /// Keep EXIF/ICC/comments in re-encoded files
    pub preserve_exif: bool,
    /// Prefer the full-featured codec back-end
    pub use_alternate_codec: bool,
    /// Back up originals before rewriting them
    pub backup_images: bool,
    /// Backup directory (None = `<media root>/image-fix-backups`)
    pub backup_dir: Option<PathBuf>,
    /// Write logs to `log_file` as well as stderr
    pub enable_logs: bool,
    /// Log file (None = `image-fix.log` in the backup directory)
    pub log_file: Option<PathBuf>,
    /// Candidates per page
    pub page_size: usize,
    /// Number of parallel workers inside a page
    pub workers: usize,
    /// Size threshold (replace only if new size < original * threshold)
    pub size_threshold: f64,
    /// Catalog state directory (None = `~/.image-fix`)
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::Balanced,
            preserve_exif: false,
            use_alternate_codec: false,
            backup_images: true,
            backup_dir: None,
            enable_logs: false,
            log_file: None,
            page_size: 5,
            workers: 4,
            size_threshold: 1.0,
            state_dir: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(anyhow::anyhow!("Page size must be greater than 0"));
        }

        if self.workers == 0 {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        if !(self.size_threshold > 0.0 && self.size_threshold <= 1.0) {
            return Err(anyhow::anyhow!("Size threshold must be between 0.0 and 1.0"));
        }

        if let Some(ref backup_dir) = self.backup_dir {
            if backup_dir.exists() && !backup_dir.is_dir() {
                return Err(anyhow::anyhow!("Backup path is not a directory: {}", backup_dir.display()));
            }
        }

        Ok(())
    }

    /// Policy handed to every core call
    pub fn policy(&self) -> OptimizationPolicy {
        OptimizationPolicy {
            level: self.optimization_level,
            preserve_metadata: self.preserve_exif,
            use_alternate_codec: self.use_alternate_codec,
            backup_original: self.backup_images,
        }
    }

    /// Backup directory for a media root
    pub fn backup_dir_for(&self, root: &Path) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_BACKUP_DIR_NAME))
    }

    /// Log file, if file logging is enabled
    pub fn log_file_for(&self, root: &Path) -> Option<PathBuf> {
        if !self.enable_logs {
            return None;
        }
        Some(
            self.log_file
                .clone()
                .unwrap_or_else(|| self.backup_dir_for(root).join(DEFAULT_LOG_FILE_NAME)),
        )
    }

    /// Catalog state directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        match self.state_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
                .join(".image-fix")),
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.page_size = 0;
        assert!(config.validate().is_err());

        config.page_size = 5;
        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 4;
        config.size_threshold = 1.5;
        assert!(config.validate().is_err());

        config.size_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.optimization_level, OptimizationLevel::Balanced);
        assert!(config.backup_images);
        assert!(!config.preserve_exif);
        assert_eq!(config.page_size, 5);
        assert_eq!(config.workers, 4);
        assert_eq!(config.size_threshold, 1.0);
        assert_eq!(config.policy(), OptimizationPolicy::default());
    }

    #[test]
    fn test_derived_paths() {
        let root = Path::new("/srv/uploads");
        let mut config = Config::default();
        assert_eq!(config.backup_dir_for(root), root.join("image-fix-backups"));
        assert_eq!(config.log_file_for(root), None);

        config.enable_logs = true;
        assert_eq!(
            config.log_file_for(root),
            Some(root.join("image-fix-backups").join("image-fix.log"))
        );

        config.backup_dir = Some(PathBuf::from("/var/backups/img"));
        config.log_file = Some(PathBuf::from("/var/log/fix.log"));
        assert_eq!(config.backup_dir_for(root), PathBuf::from("/var/backups/img"));
        assert_eq!(config.log_file_for(root), Some(PathBuf::from("/var/log/fix.log")));
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            optimization_level: OptimizationLevel::High,
            preserve_exif: true,
            backup_images: false,
            page_size: 20,
            workers: 8,
            size_threshold: 0.95,
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config, original_config);
        assert!(!loaded_config.policy().backup_original);
    }

    #[tokio::test]
    async fn test_partial_config_with_unknown_level() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"optimization_level":"maximum","workers":2}"#).unwrap();

        let config = Config::from_file(&config_path).await.unwrap();
        assert_eq!(config.optimization_level, OptimizationLevel::Balanced);
        assert_eq!(config.workers, 2);
        assert_eq!(config.page_size, 5);
    }

    #[test]
    fn test_missing_config_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = tokio_test::block_on(Config::from_file(&temp_dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, Config::default());
    }
}
