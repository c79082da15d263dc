//! Configuration module for chainback
//!
//! This module provides configuration management including:
//! - Path resolution for live data, backups and staging
//! - User settings persistence (frequency, retention, location, post-backup command)

pub mod paths;
pub mod settings;

pub use paths::EnginePaths;
pub use settings::{BackupFrequency, BackupSettings, Settings};
