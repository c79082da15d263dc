//! Backup and restore engine
//!
//! Protects a single-file database and its attachment tree with chains of
//! full and incremental backups.
//!
//! # Architecture
//!
//! - `manifest`: `ManifestStore`, the locked, atomically rewritten history
//! - `detector`: `ChangeDetector`, frequency gate plus content fingerprints
//! - `creator`: `BackupCreator`, writes full, incremental and pre-restore artifacts
//! - `restore`: `RestoreStager`, two-phase restore applied at cold start
//! - `guard`: `DeletionGuard`, refuses deletions that would break the last complete chain
//! - `retention`: `RetentionCleaner`, prunes chains older than the window
//! - `engine`: `BackupEngine`, the operation surface tying these together
//!
//! # Layout
//!
//! ```text
//! backups/
//!   manifest.json
//!   full_<timestamp>/
//!   incr_<timestamp>/
//!   pre_restore_<timestamp>/
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use chainback::backup::{BackupEngine, Trigger};
//! use chainback::config::EnginePaths;
//!
//! let engine = BackupEngine::open(EnginePaths::new()?)?;
//!
//! // At every cold start, before opening the database
//! engine.apply_pending_restore_if_any()?;
//!
//! // On lifecycle events
//! engine.on_trigger_fail_open(Trigger::Logout);
//! ```

pub mod artifact;
pub mod chain;
pub mod creator;
pub mod detector;
pub mod engine;
pub mod fingerprint;
pub mod guard;
pub mod hook;
pub mod manifest;
pub mod restore;
pub mod retention;

pub use chain::ChainIndex;
pub use creator::BackupCreator;
pub use detector::ChangeDetector;
pub use engine::{BackupEngine, EngineStatus, RestorePoint, Trigger};
pub use guard::DeletionGuard;
pub use manifest::ManifestStore;
pub use restore::{PendingRestore, RestoreStager};
pub use retention::{PruneReport, RetentionCleaner};
