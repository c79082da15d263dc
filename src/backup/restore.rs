//! Two-phase restore
//!
//! `prepare_restore` rebuilds a restore point in the staging directory and
//! drops a pending-restore marker. Nothing live is touched. At the next cold
//! start, before the database is opened, `apply_pending_restore_if_any`
//! takes a pre-restore safety snapshot and swaps the staged files in.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artifact::{ArtifactIndex, ATTACHMENTS_DIR, DATABASE_SNAPSHOT};
use super::chain::ChainIndex;
use super::creator::BackupCreator;
use super::detector::ChangeDetector;
use super::fingerprint::fingerprint_live;
use super::manifest::ManifestStore;
use crate::config::{BackupSettings, EnginePaths};
use crate::database::{journal_files, with_file_access, Database};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupRecord, Fingerprints};
use crate::storage::file_io::{read_json_optional, write_json_atomic};
use crate::storage::tree::{
    copy_file, copy_tree, remove_dir_if_exists, remove_file_if_exists, resolve_relative,
};

/// Holds the live files moved out of the way during a swap
const DISPLACED_DIR: &str = "displaced";

/// Contents of the pending-restore marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRestore {
    /// The restore point that was staged
    pub record_id: BackupId,

    /// Where the staged files are
    pub staging_path: PathBuf,

    pub prepared_at: DateTime<Utc>,

    /// Fingerprints the staged files must still have when applied
    #[serde(default)]
    pub expected: Fingerprints,
}

/// Stages restores and applies them at startup
pub struct RestoreStager<'a> {
    store: &'a ManifestStore,
    database: &'a dyn Database,
    paths: &'a EnginePaths,
    settings: &'a BackupSettings,
}

/// One completed step of a swap, undone in reverse on failure
enum SwapStep {
    MovedAside { live: PathBuf, aside: PathBuf },
    PutInPlace { live: PathBuf },
}

impl<'a> RestoreStager<'a> {
    pub fn new(
        store: &'a ManifestStore,
        database: &'a dyn Database,
        paths: &'a EnginePaths,
        settings: &'a BackupSettings,
    ) -> Self {
        Self {
            store,
            database,
            paths,
            settings,
        }
    }

    /// The staged restore waiting for the next cold start, if any
    pub fn pending(&self) -> BackupResult<Option<PendingRestore>> {
        read_json_optional(self.paths.pending_restore_marker()).map_err(|e| match e {
            BackupError::Json(reason) => {
                BackupError::Integrity(format!("Pending-restore marker is corrupt: {}", reason))
            }
            other => other,
        })
    }

    /// Rebuild restore point `id` in the staging directory and mark it pending
    ///
    /// Replaces any restore staged earlier. Fails with an integrity error if
    /// any link of the chain up to `id` is missing or the rebuilt files do
    /// not match what the backup recorded.
    pub fn prepare_restore(&self, id: BackupId) -> BackupResult<PathBuf> {
        let manifest = self.store.load()?;
        let ancestry = ChainIndex::new(&manifest).ancestry(id)?;

        // A marker must never point at a half-built staging directory
        self.discard_staged()?;

        let staging = self.paths.staging_dir();
        let expected = match self.stage(&ancestry, &staging) {
            Ok(expected) => expected,
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_exists(&staging) {
                    warn!(error = %cleanup, "Failed to clean up staging directory");
                }
                return Err(e);
            }
        };

        let pending = PendingRestore {
            record_id: id,
            staging_path: staging.clone(),
            prepared_at: Utc::now(),
            expected,
        };
        write_json_atomic(self.paths.pending_restore_marker(), &pending)?;

        info!(
            backup = %id,
            chain_length = ancestry.len(),
            staging = %staging.display(),
            "Restore staged; it will be applied at next start"
        );
        Ok(staging)
    }

    /// Copy the chain into `staging` in order and verify the result
    fn stage(
        &self,
        ancestry: &[&BackupRecord],
        staging: &Path,
    ) -> BackupResult<Fingerprints> {
        let staged_attachments = staging.join(ATTACHMENTS_DIR);
        fs::create_dir_all(&staged_attachments).map_err(|e| {
            BackupError::Io(format!("Failed to create staging directory: {}", e))
        })?;

        let mut target: Option<(PathBuf, ArtifactIndex)> = None;

        for record in ancestry {
            let dir = self.store.artifact_dir(record);
            let index = ArtifactIndex::read(&dir)?;
            let artifact_attachments = dir.join(ATTACHMENTS_DIR);

            if record.kind.is_self_contained() {
                copy_tree(&artifact_attachments, &staged_attachments)?;
            } else {
                for relative in &index.tombstones {
                    remove_file_if_exists(&resolve_relative(&staged_attachments, relative)?)?;
                }
                for relative in &index.copied {
                    copy_file(
                        &resolve_relative(&artifact_attachments, relative)?,
                        &resolve_relative(&staged_attachments, relative)?,
                    )?;
                }
            }

            debug!(backup = %record.id, kind = %record.kind, "Applied to staging");
            target = Some((dir, index));
        }

        let (target_dir, target_index) = target.ok_or_else(|| {
            BackupError::Integrity("Restore point has an empty chain".into())
        })?;

        let staged_database = staging.join(DATABASE_SNAPSHOT);
        if target_index.database.is_some() {
            copy_file(&target_dir.join(DATABASE_SNAPSHOT), &staged_database)?;
        }

        let expected = target_index.captured_state();
        let staged = fingerprint_live(&staged_database, &staged_attachments)?;
        if staged != expected {
            return Err(BackupError::Integrity(format!(
                "Staged files do not match backup {}",
                target_index.record.id
            )));
        }

        Ok(expected)
    }

    /// Drop the pending marker and the staging directory
    ///
    /// Returns whether a restore was pending.
    pub fn cancel_restore(&self) -> BackupResult<bool> {
        let was_pending = self.paths.pending_restore_marker().exists();
        self.discard_staged()?;

        if was_pending {
            info!("Pending restore cancelled");
        }
        Ok(was_pending)
    }

    fn discard_staged(&self) -> BackupResult<()> {
        remove_file_if_exists(&self.paths.pending_restore_marker())?;
        remove_dir_if_exists(&self.paths.staging_dir())
    }

    /// Apply a staged restore; call at startup before the database is opened
    ///
    /// Returns the restored record's id, or `None` when nothing was pending.
    /// If the safety snapshot fails the live data is left alone and the
    /// restore stays pending.
    pub fn apply_pending_restore_if_any(&self) -> BackupResult<Option<BackupId>> {
        let Some(pending) = self.pending()? else {
            return Ok(None);
        };

        info!(backup = %pending.record_id, "Applying pending restore");

        let staging = &pending.staging_path;
        let staged = fingerprint_live(
            &staging.join(DATABASE_SNAPSHOT),
            &staging.join(ATTACHMENTS_DIR),
        )?;
        if staged != pending.expected {
            warn!(backup = %pending.record_id, "Staged files changed since preparation; discarding restore");
            self.discard_staged()?;
            return Err(BackupError::Integrity(format!(
                "Staged restore of {} no longer matches its backup",
                pending.record_id
            )));
        }

        BackupCreator::new(self.store, self.database, self.paths, self.settings)
            .create_safety_snapshot()?;

        with_file_access(self.database, || self.swap_in(staging))?;

        self.discard_staged()?;
        ChangeDetector::new(self.store, self.database, self.paths).compute_and_store_baseline()?;

        info!(backup = %pending.record_id, "Restore applied");
        Ok(Some(pending.record_id))
    }

    /// Replace the live database, its journals and the attachment tree with the staged copies
    fn swap_in(&self, staging: &Path) -> BackupResult<()> {
        let displaced = staging.join(DISPLACED_DIR);
        remove_dir_if_exists(&displaced)?;
        fs::create_dir_all(&displaced).map_err(|e| {
            BackupError::Io(format!("Failed to prepare restore: {}", e))
        })?;
        fs::create_dir_all(self.paths.data_dir()).map_err(|e| {
            BackupError::Io(format!("Failed to prepare restore: {}", e))
        })?;

        let live_database = self.paths.database_file();
        let live_attachments = self.paths.attachments_dir();
        let [wal, shm] = journal_files(&live_database);

        let mut done = Vec::new();
        let result = Self::run_swap(
            &mut done,
            &[
                (live_database.clone(), displaced.join("database")),
                (wal, displaced.join("database-wal")),
                (shm, displaced.join("database-shm")),
                (live_attachments.clone(), displaced.join(ATTACHMENTS_DIR)),
            ],
            &[
                (staging.join(DATABASE_SNAPSHOT), live_database),
                (staging.join(ATTACHMENTS_DIR), live_attachments),
            ],
        );

        if let Err(e) = result {
            warn!(error = %e, "Restore failed midway; rolling back");
            Self::roll_back(done);
            return Err(e);
        }

        Ok(())
    }

    fn run_swap(
        done: &mut Vec<SwapStep>,
        aside: &[(PathBuf, PathBuf)],
        into_place: &[(PathBuf, PathBuf)],
    ) -> BackupResult<()> {
        for (live, target) in aside {
            if live.exists() {
                rename(live, target)?;
                done.push(SwapStep::MovedAside {
                    live: live.clone(),
                    aside: target.clone(),
                });
            }
        }

        for (staged, live) in into_place {
            if staged.exists() {
                rename(staged, live)?;
                done.push(SwapStep::PutInPlace { live: live.clone() });
            }
        }

        Ok(())
    }

    fn roll_back(done: Vec<SwapStep>) {
        for step in done.into_iter().rev() {
            let outcome = match &step {
                SwapStep::PutInPlace { live } if live.is_dir() => remove_dir_if_exists(live),
                SwapStep::PutInPlace { live } => remove_file_if_exists(live),
                SwapStep::MovedAside { live, aside } => rename(aside, live),
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Rollback step failed; displaced files remain in the staging directory");
            }
        }
    }
}

fn rename(from: &Path, to: &Path) -> BackupResult<()> {
    fs::rename(from, to).map_err(|e| {
        BackupError::Io(format!(
            "Failed to move {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::OpaqueFile;
    use crate::models::BackupKind;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        paths: EnginePaths,
        store: ManifestStore,
        settings: BackupSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
            paths.ensure_directories().unwrap();
            fs::create_dir_all(paths.attachments_dir()).unwrap();
            let store = ManifestStore::new(paths.backup_root());
            Self {
                _temp: temp,
                paths,
                store,
                settings: BackupSettings::default(),
            }
        }

        fn write(&self, relative: &str, contents: &str) {
            let path = self.paths.attachments_dir().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn backup(&self) -> BackupRecord {
            BackupCreator::new(&self.store, &OpaqueFile, &self.paths, &self.settings)
                .create_backup(false)
                .unwrap()
                .unwrap()
        }

        fn stager(&self) -> RestoreStager<'_> {
            RestoreStager::new(&self.store, &OpaqueFile, &self.paths, &self.settings)
        }

        fn live_attachment(&self, relative: &str) -> Option<String> {
            fs::read_to_string(self.paths.attachments_dir().join(relative)).ok()
        }
    }

    #[test]
    fn test_prepare_and_apply_incremental() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        fx.write("keep.txt", "keep");
        fx.write("gone.txt", "gone");
        fx.backup();

        fs::write(fx.paths.database_file(), "db2").unwrap();
        fx.write("nested/new.txt", "new");
        fs::remove_file(fx.paths.attachments_dir().join("gone.txt")).unwrap();
        let target = fx.backup();

        // Drift away from the target
        fs::write(fx.paths.database_file(), "db3").unwrap();
        fx.write("keep.txt", "edited");

        let staging = fx.stager().prepare_restore(target.id).unwrap();
        assert!(staging.join("attachments/nested/new.txt").exists());
        assert!(!staging.join("attachments/gone.txt").exists());
        assert_eq!(fs::read_to_string(fx.paths.database_file()).unwrap(), "db3");
        assert_eq!(fx.stager().pending().unwrap().unwrap().record_id, target.id);

        let applied = fx.stager().apply_pending_restore_if_any().unwrap();
        assert_eq!(applied, Some(target.id));

        assert_eq!(fs::read_to_string(fx.paths.database_file()).unwrap(), "db2");
        assert_eq!(fx.live_attachment("keep.txt").as_deref(), Some("keep"));
        assert_eq!(fx.live_attachment("nested/new.txt").as_deref(), Some("new"));
        assert!(fx.live_attachment("gone.txt").is_none());

        assert!(fx.stager().pending().unwrap().is_none());
        assert!(!fx.paths.staging_dir().exists());

        let manifest = fx.store.load().unwrap();
        let safety: Vec<_> = manifest
            .records
            .iter()
            .filter(|r| r.kind == BackupKind::PreRestore)
            .collect();
        assert_eq!(safety.len(), 1);
        let safety_db = fx.store.artifact_dir(safety[0]).join(DATABASE_SNAPSHOT);
        assert_eq!(fs::read_to_string(safety_db).unwrap(), "db3");
    }

    #[test]
    fn test_apply_without_marker_is_noop() {
        let fx = Fixture::new();
        assert_eq!(fx.stager().apply_pending_restore_if_any().unwrap(), None);
        assert!(fx.store.load().unwrap().records.is_empty());
    }

    #[test]
    fn test_cancel_discards_staging() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        let record = fx.backup();

        fx.stager().prepare_restore(record.id).unwrap();
        assert!(fx.stager().cancel_restore().unwrap());
        assert!(!fx.paths.staging_dir().exists());
        assert!(!fx.paths.pending_restore_marker().exists());
        assert!(!fx.stager().cancel_restore().unwrap());
    }

    #[test]
    fn test_gap_rejects_restore() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        fx.backup();
        fs::write(fx.paths.database_file(), "db2").unwrap();
        let middle = fx.backup();
        fs::write(fx.paths.database_file(), "db3").unwrap();
        let last = fx.backup();

        fx.store
            .update(|m| {
                m.remove_all(&[middle.id]);
                Ok(())
            })
            .unwrap();

        let err = fx.stager().prepare_restore(last.id).unwrap_err();
        assert!(err.is_integrity());
        assert!(!fx.paths.pending_restore_marker().exists());
    }

    #[test]
    fn test_tampered_artifact_fails_verification() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        fx.write("a.txt", "a");
        let record = fx.backup();

        fs::write(fx.store.artifact_dir(&record).join("attachments/a.txt"), "tampered").unwrap();

        let err = fx.stager().prepare_restore(record.id).unwrap_err();
        assert!(err.is_integrity());
        assert!(!fx.paths.staging_dir().exists());
        assert!(!fx.paths.pending_restore_marker().exists());
    }

    #[test]
    fn test_staging_changed_before_apply_is_discarded() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        let record = fx.backup();
        fs::write(fx.paths.database_file(), "db2").unwrap();

        let staging = fx.stager().prepare_restore(record.id).unwrap();
        fs::write(staging.join(DATABASE_SNAPSHOT), "garbage").unwrap();

        let err = fx.stager().apply_pending_restore_if_any().unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(fs::read_to_string(fx.paths.database_file()).unwrap(), "db2");
        assert!(fx.stager().pending().unwrap().is_none());
    }

    #[test]
    fn test_journal_files_removed_on_apply() {
        let fx = Fixture::new();
        fs::write(fx.paths.database_file(), "db1").unwrap();
        let record = fx.backup();

        let [wal, shm] = journal_files(&fx.paths.database_file());
        fs::write(&wal, "stale").unwrap();
        fs::write(&shm, "stale").unwrap();

        fx.stager().prepare_restore(record.id).unwrap();
        fx.stager().apply_pending_restore_if_any().unwrap();

        assert!(!wal.exists());
        assert!(!shm.exists());
    }
}
