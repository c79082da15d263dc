//! User settings for chainback
//!
//! Manages backup frequency, retention, location and the optional
//! post-backup command.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::paths::{validate_backup_location, EnginePaths, DEFAULT_DATABASE_FILE};
use crate::error::BackupError;
use crate::storage::file_io::write_json_atomic;

/// How often automatic triggers may produce a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    /// Only explicit "backup now" requests create backups
    Manual,
    /// At most one automatic backup per day (default)
    #[default]
    Daily,
    /// At most one automatic backup per week
    Weekly,
    /// Every lifecycle trigger checks for changes
    PerSession,
}

impl BackupFrequency {
    /// Minimum time between automatic backups, `None` when automatic backups are off
    pub fn min_interval(&self) -> Option<Duration> {
        match self {
            BackupFrequency::Manual => None,
            BackupFrequency::Daily => Some(Duration::days(1)),
            BackupFrequency::Weekly => Some(Duration::weeks(1)),
            BackupFrequency::PerSession => Some(Duration::zero()),
        }
    }
}

impl std::fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupFrequency::Manual => write!(f, "manual"),
            BackupFrequency::Daily => write!(f, "daily"),
            BackupFrequency::Weekly => write!(f, "weekly"),
            BackupFrequency::PerSession => write!(f, "per-session"),
        }
    }
}

/// Backup behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// How often automatic triggers back up
    #[serde(default)]
    pub frequency: BackupFrequency,

    /// Chains whose full backup is older than this many days are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// A new chain is started once the newest full backup is this old
    #[serde(default = "default_full_refresh_days")]
    pub full_refresh_days: u32,

    /// Custom backup location (e.g. a cloud-synced folder)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,

    /// Shell command run after each successful backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backup_command: Option<String>,

    /// Run retention after every triggered backup
    #[serde(default = "default_auto_prune")]
    pub auto_prune: bool,
}

impl BackupSettings {
    /// Retention window as a duration
    pub fn retention_period(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    /// Full-refresh interval as a duration
    pub fn full_refresh_interval(&self) -> Duration {
        Duration::days(i64::from(self.full_refresh_days))
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            frequency: BackupFrequency::default(),
            retention_days: default_retention_days(),
            full_refresh_days: default_full_refresh_days(),
            location: None,
            post_backup_command: None,
            auto_prune: default_auto_prune(),
        }
    }
}

/// User settings for chainback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Name of the database file inside the data directory
    #[serde(default = "default_database_file_name")]
    pub database_file_name: String,

    /// Default log filter when neither `--log-level` nor `RUST_LOG` is given
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Backup behaviour
    #[serde(default)]
    pub backup: BackupSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_database_file_name() -> String {
    DEFAULT_DATABASE_FILE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_full_refresh_days() -> u32 {
    7
}

fn default_auto_prune() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            database_file_name: default_database_file_name(),
            log_level: default_log_level(),
            backup: BackupSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    pub fn load_or_create(paths: &EnginePaths) -> Result<Self, BackupError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                BackupError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &EnginePaths) -> Result<(), BackupError> {
        self.validate()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Check the settings for values the engine cannot work with
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.database_file_name.trim().is_empty()
            || self.database_file_name.contains(['/', '\\'])
        {
            return Err(BackupError::Config(format!(
                "Invalid database file name: {:?}",
                self.database_file_name
            )));
        }

        if self.backup.retention_days == 0 {
            return Err(BackupError::Config(
                "Retention must be at least one day".into(),
            ));
        }

        if let Some(location) = &self.backup.location {
            validate_backup_location(location)?;
        }

        Ok(())
    }

    /// Apply the settings that affect path resolution
    pub fn apply_to(&self, paths: EnginePaths) -> EnginePaths {
        paths
            .with_database_file_name(self.database_file_name.clone())
            .with_backup_location(self.backup.location.clone())
    }
}
