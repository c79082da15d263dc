//! chainback - backup and restore engine for a single-file database plus attachments
//!
//! This library protects an application's database file and its attachment
//! tree with full and incremental backup chains, hash-based change detection,
//! dependency-aware deletion protection and a two-phase restore that is
//! applied at the next cold start.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path resolution and user settings
//! - `error`: Custom error types
//! - `models`: Backup records, identifiers and the manifest
//! - `storage`: Atomic JSON files and file-tree helpers
//! - `database`: The database collaborator (checkpoint and file-operation hooks)
//! - `backup`: The engine itself
//! - `cli`: Command handlers for the `chainback` binary
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use chainback::backup::{BackupEngine, Trigger};
//! use chainback::config::EnginePaths;
//!
//! let engine = BackupEngine::open(EnginePaths::new()?)?;
//! engine.apply_pending_restore_if_any()?;
//! engine.on_trigger_fail_open(Trigger::Login);
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;

pub use backup::{BackupEngine, Trigger};
pub use error::{BackupError, BackupResult};
