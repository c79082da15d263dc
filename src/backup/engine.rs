//! Backup engine service
//!
//! [`BackupEngine`] is the operation surface hosts call: lifecycle triggers,
//! status, restore points, staging and deletion. It owns manifest access and
//! reloads the manifest from disk for every operation.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::chain::ChainIndex;
use super::creator::BackupCreator;
use super::detector::{frequency_allows, ChangeDetector};
use super::guard::DeletionGuard;
use super::manifest::ManifestStore;
use super::restore::{PendingRestore, RestoreStager};
use super::retention::{PruneReport, RetentionCleaner};
use crate::config::{BackupFrequency, EnginePaths, Settings};
use crate::database::{Database, SqliteDatabase};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupRecord};

/// Host lifecycle events that may lead to a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Login,
    Logout,
    SessionTimeout,
    ProcessExit,
    /// Explicit user request; bypasses the frequency gate
    Manual,
}

impl Trigger {
    /// Whether the configured frequency applies to this trigger
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Trigger::Manual)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Login => write!(f, "login"),
            Trigger::Logout => write!(f, "logout"),
            Trigger::SessionTimeout => write!(f, "session-timeout"),
            Trigger::ProcessExit => write!(f, "process-exit"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Snapshot of the engine's state
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub backup_root: PathBuf,
    pub frequency: BackupFrequency,
    pub record_count: usize,
    pub chain_count: usize,
    pub complete_chain_count: usize,
    pub total_size_bytes: u64,
    pub latest: Option<BackupRecord>,
    pub last_backup_check: Option<DateTime<Utc>>,
    pub pending_restore: Option<PendingRestore>,
}

/// A record plus the derived facts a restore/delete UI needs
#[derive(Debug, Clone, Serialize)]
pub struct RestorePoint {
    pub record: BackupRecord,
    /// Records that cannot be restored without this one
    pub dependent_count: usize,
    pub is_newest_in_chain: bool,
    /// Deleting this record would be refused
    pub is_protected: bool,
    /// Its whole chain up to here resolves
    pub restorable: bool,
}

/// The backup/restore engine for one installation
pub struct BackupEngine {
    paths: EnginePaths,
    settings: Settings,
    database: Arc<dyn Database>,
    store: ManifestStore,
    operation: Mutex<()>,
}

impl BackupEngine {
    /// Create an engine; `settings` decide the database file name and backup location
    pub fn new(
        paths: EnginePaths,
        settings: Settings,
        database: Arc<dyn Database>,
    ) -> BackupResult<Self> {
        settings.validate()?;
        let paths = settings.apply_to(paths);
        let store = ManifestStore::new(paths.backup_root());

        Ok(Self {
            paths,
            settings,
            database,
            store,
            operation: Mutex::new(()),
        })
    }

    /// Create an engine for a SQLite database, loading settings from disk
    pub fn open(paths: EnginePaths) -> BackupResult<Self> {
        let settings = Settings::load_or_create(&paths)?;
        let database_file = settings.apply_to(paths.clone()).database_file();
        Self::new(paths, settings, Arc::new(SqliteDatabase::new(database_file)))
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn exclusive(&self) -> BackupResult<MutexGuard<'_, ()>> {
        self.operation
            .lock()
            .map_err(|e| BackupError::Storage(format!("Engine lock poisoned: {}", e)))
    }

    fn creator(&self) -> BackupCreator<'_> {
        BackupCreator::new(
            &self.store,
            self.database.as_ref(),
            &self.paths,
            &self.settings.backup,
        )
    }

    fn detector(&self) -> ChangeDetector<'_> {
        ChangeDetector::new(&self.store, self.database.as_ref(), &self.paths)
    }

    fn stager(&self) -> RestoreStager<'_> {
        RestoreStager::new(
            &self.store,
            self.database.as_ref(),
            &self.paths,
            &self.settings.backup,
        )
    }

    fn restore_pending(&self) -> bool {
        self.paths.pending_restore_marker().exists()
    }

    /// Current engine state
    pub fn status(&self) -> BackupResult<EngineStatus> {
        let manifest = self.store.load()?;
        let index = ChainIndex::new(&manifest);

        Ok(EngineStatus {
            backup_root: self.paths.backup_root(),
            frequency: self.settings.backup.frequency,
            record_count: manifest.records.len(),
            chain_count: index.chain_ids().len(),
            complete_chain_count: index.complete_chain_count(),
            total_size_bytes: manifest.total_size(),
            latest: manifest.latest().cloned(),
            last_backup_check: manifest.last_backup_check,
            pending_restore: self.stager().pending()?,
        })
    }

    /// Whether an automatic backup is due under the configured frequency
    pub fn needs_backup(&self) -> BackupResult<bool> {
        let _guard = self.exclusive()?;
        self.detector().needs_backup(self.settings.backup.frequency)
    }

    /// Back up now if anything changed; `force_full` always writes a new full backup
    ///
    /// Does nothing while a restore is pending.
    pub fn create_backup(&self, force_full: bool) -> BackupResult<Option<BackupRecord>> {
        let _guard = self.exclusive()?;

        if self.restore_pending() {
            info!("Restore pending; backups are paused until restart");
            return Ok(None);
        }

        self.creator().create_backup(force_full)
    }

    /// All records, newest first, with their derived state
    pub fn list_restore_points(&self) -> BackupResult<Vec<RestorePoint>> {
        let manifest = self.store.load()?;
        let index = ChainIndex::new(&manifest);

        Ok(manifest
            .records
            .iter()
            .rev()
            .map(|record| RestorePoint {
                record: record.clone(),
                dependent_count: index.dependents(record.id).len(),
                is_newest_in_chain: index.is_newest_in_chain(record.id),
                is_protected: index.is_protected(record.id),
                restorable: index.is_restorable(record.id),
            })
            .collect())
    }

    /// Find a record by full UUID or short `bk-` form
    pub fn resolve(&self, input: &str) -> BackupResult<BackupRecord> {
        Ok(self.store.load()?.resolve(input)?.clone())
    }

    /// Stage restore point `id` for the next cold start
    pub fn prepare_restore(&self, id: BackupId) -> BackupResult<PathBuf> {
        let _guard = self.exclusive()?;
        self.stager().prepare_restore(id)
    }

    /// Discard a staged restore; returns whether one was pending
    pub fn cancel_restore(&self) -> BackupResult<bool> {
        let _guard = self.exclusive()?;
        self.stager().cancel_restore()
    }

    /// Apply a staged restore; call at startup before the database is opened
    pub fn apply_pending_restore_if_any(&self) -> BackupResult<Option<BackupId>> {
        let _guard = self.exclusive()?;
        self.stager().apply_pending_restore_if_any()
    }

    /// The staged restore, if any
    pub fn pending_restore(&self) -> BackupResult<Option<PendingRestore>> {
        self.stager().pending()
    }

    /// Records `delete(id)` would remove, or the protection error it would raise
    pub fn deletion_preview(&self, id: BackupId) -> BackupResult<Vec<BackupRecord>> {
        let manifest = self.store.load()?;
        let removal = ChainIndex::new(&manifest).deletion_set(id)?;
        Ok(manifest
            .records
            .iter()
            .filter(|r| removal.contains(&r.id))
            .cloned()
            .collect())
    }

    /// Delete a record, cascading to its dependents when allowed
    pub fn delete(&self, id: BackupId) -> BackupResult<Vec<BackupRecord>> {
        let _guard = self.exclusive()?;
        DeletionGuard::new(&self.store).delete(id)
    }

    /// Records a prune would start from under the configured retention window
    pub fn prune_candidates(&self) -> BackupResult<Vec<BackupRecord>> {
        let manifest = self.store.load()?;
        Ok(RetentionCleaner::candidates(
            &manifest,
            self.settings.backup.retention_period(),
            Utc::now(),
        ))
    }

    /// Apply the configured retention window
    pub fn prune(&self) -> BackupResult<PruneReport> {
        let _guard = self.exclusive()?;
        RetentionCleaner::new(&self.store).prune(self.settings.backup.retention_period())
    }

    /// Run the backup pipeline for a lifecycle event
    ///
    /// Automatic triggers respect the configured frequency; `Manual` only
    /// requires changes. Retention runs afterwards when `auto_prune` is set.
    pub fn on_trigger(&self, trigger: Trigger) -> BackupResult<Option<BackupRecord>> {
        let _guard = self.exclusive()?;

        if self.restore_pending() {
            info!(%trigger, "Restore pending; ignoring trigger until restart");
            return Ok(None);
        }

        let frequency = self.settings.backup.frequency;
        if trigger.is_automatic() {
            let last_check = self.store.load()?.last_backup_check;
            if !frequency_allows(frequency, last_check, Utc::now()) {
                debug!(%trigger, %frequency, "Backup not due");
                return Ok(None);
            }
        }

        let created = self.creator().create_backup(false)?;

        if self.settings.backup.auto_prune {
            if let Err(e) = RetentionCleaner::new(&self.store)
                .prune(self.settings.backup.retention_period())
            {
                warn!(%trigger, error = %e, "Retention failed");
            }
        }

        Ok(created)
    }

    /// [`BackupEngine::on_trigger`], logging failures instead of returning them
    pub fn on_trigger_fail_open(&self, trigger: Trigger) -> Option<BackupRecord> {
        match self.on_trigger(trigger) {
            Ok(created) => created,
            Err(e) => {
                error!(%trigger, error = %e, "Backup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupFrequency;
    use crate::database::OpaqueFile;
    use crate::models::BackupKind;
    use std::fs;
    use tempfile::TempDir;

    fn engine(frequency: BackupFrequency) -> (TempDir, BackupEngine) {
        let temp = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
        paths.ensure_directories().unwrap();
        fs::write(paths.database_file(), "db1").unwrap();

        let mut settings = Settings::default();
        settings.backup.frequency = frequency;
        let engine = BackupEngine::new(paths, settings, Arc::new(OpaqueFile)).unwrap();
        (temp, engine)
    }

    #[test]
    fn test_trigger_respects_frequency() {
        let (_temp, engine) = engine(BackupFrequency::Daily);

        let first = engine.on_trigger(Trigger::Login).unwrap();
        assert!(first.is_some());

        fs::write(engine.paths().database_file(), "db2").unwrap();
        assert!(engine.on_trigger(Trigger::Logout).unwrap().is_none());

        // Manual ignores the frequency but still needs changes
        let manual = engine.on_trigger(Trigger::Manual).unwrap().unwrap();
        assert_eq!(manual.kind, BackupKind::Incremental);
        assert!(engine.on_trigger(Trigger::Manual).unwrap().is_none());
    }

    #[test]
    fn test_manual_frequency_never_auto_backs_up() {
        let (_temp, engine) = engine(BackupFrequency::Manual);
        assert!(engine.on_trigger(Trigger::ProcessExit).unwrap().is_none());
        assert!(engine.on_trigger(Trigger::Manual).unwrap().is_some());
    }

    #[test]
    fn test_pending_restore_pauses_backups() {
        let (_temp, engine) = engine(BackupFrequency::PerSession);
        let record = engine.create_backup(false).unwrap().unwrap();
        engine.prepare_restore(record.id).unwrap();

        fs::write(engine.paths().database_file(), "db2").unwrap();
        assert!(engine.on_trigger(Trigger::Login).unwrap().is_none());
        assert!(engine.create_backup(true).unwrap().is_none());
        assert!(engine.status().unwrap().pending_restore.is_some());

        engine.cancel_restore().unwrap();
        assert!(engine.create_backup(false).unwrap().is_some());
    }

    #[test]
    fn test_status_and_restore_points() {
        let (_temp, engine) = engine(BackupFrequency::PerSession);
        let full = engine.create_backup(false).unwrap().unwrap();
        fs::write(engine.paths().database_file(), "db2").unwrap();
        let incr = engine.create_backup(false).unwrap().unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.record_count, 2);
        assert_eq!(status.chain_count, 1);
        assert_eq!(status.complete_chain_count, 1);
        assert_eq!(status.latest.as_ref().map(|r| r.id), Some(incr.id));
        assert!(status.last_backup_check.is_some());

        let points = engine.list_restore_points().unwrap();
        assert_eq!(points[0].record.id, incr.id);
        assert!(points[0].is_newest_in_chain);
        assert!(!points[0].is_protected);
        assert_eq!(points[1].record.id, full.id);
        assert_eq!(points[1].dependent_count, 1);
        assert!(points[1].is_protected);
        assert!(points.iter().all(|p| p.restorable));
    }

    #[test]
    fn test_fail_open_swallows_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let paths = EnginePaths::with_base_dir(temp.path().join("base"));
        paths.ensure_directories().unwrap();
        fs::write(paths.database_file(), "db").unwrap();
        let engine = BackupEngine::new(paths, Settings::default(), Arc::new(OpaqueFile)).unwrap();

        // Point the manifest lock at a regular file so every operation fails
        let broken = BackupEngine {
            store: ManifestStore::new(blocker),
            ..engine
        };
        assert!(broken.on_trigger(Trigger::Manual).is_err());
        assert!(broken.on_trigger_fail_open(Trigger::Manual).is_none());
    }
}
