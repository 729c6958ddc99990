//! # Backup Store Module
//!
//! Copia una-tantum dell'originale in una directory protetta prima di ogni modifica.
//!
//! ## Invarianti:
//! - Il backup vive in `backup_dir/basename(originale)`
//! - Viene creato AL MASSIMO una volta per basename: un backup esistente non
//!   viene mai sovrascritto, anche se l'originale è cambiato nel frattempo
//! - L'originale non viene mai modificato
//! - La directory contiene un marker `.htaccess` che nega l'accesso via web
//! - `.owners/basename` registra il path che ha creato il backup: il restore
//!   scrive solo sopra quel file, mai sopra un omonimo in un'altra cartella
//!
//! La creazione passa da un temp file nella directory di backup seguito da un
//! `persist_noclobber`: due chiamate concorrenti sullo stesso basename producono
//! comunque un solo file.

use crate::error::OptimizeError;
use crate::file_manager::FileManager;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the access-denied marker written at the root of the backup directory
pub const ACCESS_MARKER: &str = ".htaccess";
const ACCESS_MARKER_CONTENT: &str = "deny from all";

/// Sub-directory recording which file each backup was taken from
pub const OWNERS_DIR: &str = ".owners";

/// Absolute form of a path, used to compare backup owners
fn identity(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Outcome of a backup request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Created,
    AlreadyPresent,
}

/// Protected directory holding pre-optimization copies
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Open (creating if needed) the backup directory
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OptimizeError> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join(OWNERS_DIR))?;

        let marker = dir.join(ACCESS_MARKER);
        if !marker.exists() {
            std::fs::write(&marker, ACCESS_MARKER_CONTENT)?;
            debug!("Wrote access marker: {}", marker.display());
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the backup of `original` lives at
    pub fn backup_path(&self, original: &Path) -> Result<PathBuf, OptimizeError> {
        let name = original.file_name().ok_or_else(|| {
            OptimizeError::Validation(format!("Path has no file name: {}", original.display()))
        })?;
        Ok(self.dir.join(name))
    }

    pub fn has_backup(&self, original: &Path) -> bool {
        self.backup_path(original).map(|p| p.is_file()).unwrap_or(false)
    }

    fn owner_path(&self, original: &Path) -> Result<PathBuf, OptimizeError> {
        let name = original.file_name().ok_or_else(|| {
            OptimizeError::Validation(format!("Path has no file name: {}", original.display()))
        })?;
        Ok(self.dir.join(OWNERS_DIR).join(name))
    }

    /// File the backup in the slot of `original` was taken from, if recorded
    pub fn owner(&self, original: &Path) -> Result<Option<PathBuf>, OptimizeError> {
        match std::fs::read_to_string(self.owner_path(original)?) {
            Ok(owner) => Ok(Some(PathBuf::from(owner))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OptimizeError::Io(e)),
        }
    }

    /// Whether the backup in the slot of `original` was taken from `original` itself
    pub fn owns_backup(&self, original: &Path) -> Result<bool, OptimizeError> {
        Ok(self
            .owner(original)?
            .is_some_and(|owner| owner.to_string_lossy() == identity(original)))
    }

    /// Ensure a backup of `original` exists. Idempotent.
    pub fn ensure_backup(&self, original: &Path) -> Result<BackupOutcome, OptimizeError> {
        let backup_path = self.backup_path(original)?;
        if backup_path.exists() {
            if self.owns_backup(original)? {
                debug!("Backup already present: {}", backup_path.display());
            } else {
                warn!(
                    "Backup slot {} is held by another file, {} has no backup of its own",
                    backup_path.display(),
                    original.display()
                );
            }
            return Ok(BackupOutcome::AlreadyPresent);
        }

        let bytes = std::fs::read(original)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;

        match temp.persist_noclobber(&backup_path) {
            Ok(_) => {
                FileManager::replace_file(&self.owner_path(original)?, identity(original).as_bytes())?;
                info!("Backed up {} -> {}", original.display(), backup_path.display());
                Ok(BackupOutcome::Created)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("Backup created concurrently: {}", backup_path.display());
                Ok(BackupOutcome::AlreadyPresent)
            }
            Err(e) => Err(OptimizeError::Io(e.error)),
        }
    }

    /// Async wrapper around [`BackupStore::ensure_backup`]
    pub async fn ensure_backup_async(&self, original: &Path) -> Result<BackupOutcome, OptimizeError> {
        let store = self.clone();
        let original = original.to_path_buf();
        tokio::task::spawn_blocking(move || store.ensure_backup(&original))
            .await
            .map_err(|e| OptimizeError::Io(std::io::Error::other(e)))?
    }

    /// Put the backed-up bytes back over `original`. The backup is kept.
    ///
    /// Fails with `Validation` when the backup was taken from a different file
    /// with the same name. Returns `(size before restore, restored size)`.
    pub fn restore(&self, original: &Path) -> Result<(u64, u64), OptimizeError> {
        let backup_path = self.backup_path(original)?;
        let bytes = std::fs::read(&backup_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OptimizeError::Io(std::io::Error::new(
                    e.kind(),
                    format!("No backup for {}", original.display()),
                ))
            } else {
                OptimizeError::Io(e)
            }
        })?;

        if !self.owns_backup(original)? {
            let owner = self.owner(original)?;
            return Err(OptimizeError::Validation(format!(
                "Backup {} was taken from {}, not restoring it over {}",
                backup_path.display(),
                owner.map_or_else(|| "an unknown file".to_string(), |o| o.display().to_string()),
                original.display()
            )));
        }

        let current_size = std::fs::metadata(original).map(|m| m.len()).unwrap_or(0);
        FileManager::replace_file(original, &bytes)?;
        info!("Restored {} from {}", original.display(), backup_path.display());

        Ok((current_size, bytes.len() as u64))
    }

    /// Check that the directory accepts new files
    pub fn is_writable(&self) -> bool {
        tempfile::NamedTempFile::new_in(&self.dir).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_writes_access_marker() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let marker = std::fs::read_to_string(store.dir().join(ACCESS_MARKER)).unwrap();
        assert_eq!(marker, "deny from all");
        assert!(store.is_writable());
    }

    #[test]
    fn test_backup_keeps_first_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let original = temp_dir.path().join("photo.jpg");

        std::fs::write(&original, b"first").unwrap();
        assert_eq!(store.ensure_backup(&original).unwrap(), BackupOutcome::Created);

        std::fs::write(&original, b"second").unwrap();
        assert_eq!(store.ensure_backup(&original).unwrap(), BackupOutcome::AlreadyPresent);

        let backup = store.backup_path(&original).unwrap();
        assert_eq!(std::fs::read(backup).unwrap(), b"first");
        assert_eq!(std::fs::read(&original).unwrap(), b"second");

        // marker + owners directory + one backup
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 3);
        assert!(store.owns_backup(&original).unwrap());
    }

    #[test]
    fn test_restore_refuses_backup_of_same_named_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let first = temp_dir.path().join("one").join("photo.jpg");
        let second = temp_dir.path().join("two").join("photo.jpg");
        for (path, bytes) in [(&first, b"picture a"), (&second, b"picture b")] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }

        assert_eq!(store.ensure_backup(&first).unwrap(), BackupOutcome::Created);
        assert_eq!(store.ensure_backup(&second).unwrap(), BackupOutcome::AlreadyPresent);
        assert!(store.owns_backup(&first).unwrap());
        assert!(!store.owns_backup(&second).unwrap());

        std::fs::write(&first, b"a").unwrap();
        std::fs::write(&second, b"b").unwrap();

        let err = store.restore(&second).unwrap_err();
        assert!(matches!(err, OptimizeError::Validation(_)));
        assert_eq!(std::fs::read(&second).unwrap(), b"b");

        store.restore(&first).unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"picture a");
    }

    #[test]
    fn test_restore_without_recorded_owner_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let original = temp_dir.path().join("logo.png");
        std::fs::write(&original, b"current").unwrap();
        std::fs::write(store.dir().join("logo.png"), b"stray copy").unwrap();

        let err = store.restore(&original).unwrap_err();
        assert!(matches!(err, OptimizeError::Validation(_)));
        assert_eq!(std::fs::read(&original).unwrap(), b"current");
    }

    #[test]
    fn test_backup_of_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let err = store.ensure_backup(&temp_dir.path().join("missing.png")).unwrap_err();
        assert!(matches!(err, OptimizeError::Io(_)));
        assert!(!store.has_backup(&temp_dir.path().join("missing.png")));
    }

    #[test]
    fn test_restore_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let original = temp_dir.path().join("logo.png");

        std::fs::write(&original, b"original bytes").unwrap();
        store.ensure_backup(&original).unwrap();
        std::fs::write(&original, b"tiny").unwrap();

        let (before, after) = store.restore(&original).unwrap();
        assert_eq!(before, 4);
        assert_eq!(after, 14);
        assert_eq!(std::fs::read(&original).unwrap(), b"original bytes");
        assert!(store.has_backup(&original));
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups")).unwrap();
        let original = temp_dir.path().join("logo.png");
        std::fs::write(&original, b"data").unwrap();

        let err = store.restore(&original).unwrap_err();
        assert!(err.to_string().contains("No backup"));
        assert_eq!(std::fs::read(&original).unwrap(), b"data");
    }
}
