//! Path management for chainback
//!
//! Resolves where the live database, its attachments, the backups and the
//! restore staging area live.
//!
//! ## Path Resolution Order
//!
//! 1. `CHAINBACK_DATA_DIR` environment variable (if set)
//! 2. The platform config directory (`~/.config/chainback` on Linux,
//!    `%APPDATA%\chainback` on Windows)

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::error::BackupError;

/// File name used when the settings do not name the database file
pub const DEFAULT_DATABASE_FILE: &str = "app.db";

/// Manages all paths used by chainback
#[derive(Debug, Clone)]
pub struct EnginePaths {
    /// Base directory for all application data
    base_dir: PathBuf,
    /// Name of the database file inside the data directory
    database_file_name: String,
    /// Custom backup location, if configured
    backup_location: Option<PathBuf>,
}

impl EnginePaths {
    /// Create a new EnginePaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no base directory can be determined.
    pub fn new() -> Result<Self, BackupError> {
        let base_dir = if let Ok(custom) = std::env::var("CHAINBACK_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self::with_base_dir(base_dir))
    }

    /// Create EnginePaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            database_file_name: DEFAULT_DATABASE_FILE.to_string(),
            backup_location: None,
        }
    }

    /// Use a different database file name
    pub fn with_database_file_name(mut self, name: impl Into<String>) -> Self {
        self.database_file_name = name.into();
        self
    }

    /// Store backups in a custom location instead of `<base>/backups`
    pub fn with_backup_location(mut self, location: Option<PathBuf>) -> Self {
        self.backup_location = location;
        self
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the data directory holding the live database and attachments
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Get the name of the database file
    pub fn database_file_name(&self) -> &str {
        &self.database_file_name
    }

    /// Get the path to the live database file
    pub fn database_file(&self) -> PathBuf {
        self.data_dir().join(&self.database_file_name)
    }

    /// Get the path to the live attachment tree
    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir().join("attachments")
    }

    /// Get the default backup directory (`<base>/backups/`)
    pub fn default_backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the effective backup root, honouring a custom location
    pub fn backup_root(&self) -> PathBuf {
        self.backup_location
            .clone()
            .unwrap_or_else(|| self.default_backup_dir())
    }

    /// Whether backups go to a custom location
    pub fn has_custom_location(&self) -> bool {
        self.backup_location.is_some()
    }

    /// Get the path to manifest.json
    pub fn manifest_file(&self) -> PathBuf {
        self.backup_root().join("manifest.json")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the restore staging directory
    ///
    /// Staging sits next to the live data so that applying a restore is a
    /// rename on the same filesystem.
    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join("restore_staging")
    }

    /// Get the path to the pending-restore marker
    pub fn pending_restore_marker(&self) -> PathBuf {
        self.base_dir.join("pending_restore.json")
    }

    /// Ensure the data and backup directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| BackupError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.data_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create data directory: {}", e)))?;

        self.ensure_backup_root()?;

        Ok(())
    }

    /// Ensure the backup root exists, reporting a configuration error when a
    /// custom location cannot be used
    pub fn ensure_backup_root(&self) -> Result<PathBuf, BackupError> {
        let root = self.backup_root();

        if let Some(location) = &self.backup_location {
            validate_backup_location(location)?;
        }

        std::fs::create_dir_all(&root).map_err(|e| {
            if self.has_custom_location() {
                BackupError::Config(format!(
                    "Backup location {} is unavailable: {}",
                    root.display(),
                    e
                ))
            } else {
                BackupError::Io(format!("Failed to create backup directory: {}", e))
            }
        })?;

        Ok(root)
    }
}

/// Reject custom backup locations that can never work
pub fn validate_backup_location(location: &Path) -> Result<(), BackupError> {
    if location.as_os_str().is_empty() {
        return Err(BackupError::Config("Backup location is empty".into()));
    }

    if !location.is_absolute() {
        return Err(BackupError::Config(format!(
            "Backup location must be an absolute path: {}",
            location.display()
        )));
    }

    if location.exists() && !location.is_dir() {
        return Err(BackupError::Config(format!(
            "Backup location is not a directory: {}",
            location.display()
        )));
    }

    Ok(())
}

/// Resolve the default data directory path based on platform
fn resolve_default_path() -> Result<PathBuf, BackupError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| BackupError::Config("Could not determine home directory".into()))?;
    Ok(dirs.config_dir().join("chainback"))
}
