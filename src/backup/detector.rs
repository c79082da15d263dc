//! Change detection
//!
//! Frequency first, fingerprints second. The filesystem is only touched once
//! the configured interval has elapsed, and the database is always
//! checkpointed before it is hashed, so journal merges never register as
//! changes on their own.
//!
//! Baselines are written only through [`ChangeDetector::store_baseline`] and
//! [`ChangeDetector::compute_and_store_baseline`], both of which run after a
//! checkpoint. Callers never refresh a baseline themselves.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::fingerprint::fingerprint_live;
use super::manifest::ManifestStore;
use crate::config::{BackupFrequency, EnginePaths};
use crate::database::{with_file_access, Database};
use crate::error::BackupResult;
use crate::models::{BackupManifest, Fingerprints};

/// Decides whether the live data changed since the last backup
pub struct ChangeDetector<'a> {
    store: &'a ManifestStore,
    database: &'a dyn Database,
    database_file: PathBuf,
    attachments_dir: PathBuf,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a ManifestStore, database: &'a dyn Database, paths: &EnginePaths) -> Self {
        Self {
            store,
            database,
            database_file: paths.database_file(),
            attachments_dir: paths.attachments_dir(),
        }
    }

    /// Whether an automatic backup is due under `frequency`
    pub fn needs_backup(&self, frequency: BackupFrequency) -> BackupResult<bool> {
        let manifest = self.store.load()?;

        if !frequency_allows(frequency, manifest.last_backup_check, Utc::now()) {
            debug!(%frequency, last = ?manifest.last_backup_check, "Backup not due yet");
            return Ok(false);
        }

        self.changed_since_baseline(&manifest)
    }

    /// Whether the live data differs from the baseline, ignoring frequency
    pub fn has_changes(&self) -> BackupResult<bool> {
        let manifest = self.store.load()?;
        self.changed_since_baseline(&manifest)
    }

    fn changed_since_baseline(&self, manifest: &BackupManifest) -> BackupResult<bool> {
        let current = self.checkpointed_fingerprints()?;

        if current == manifest.baseline_hashes {
            debug!(tracked = current.len(), "No changes since last backup");
            return Ok(false);
        }

        let changed = current
            .iter()
            .filter(|(path, hash)| manifest.baseline_hashes.get(*path) != Some(*hash))
            .count();
        let removed = manifest
            .baseline_hashes
            .keys()
            .filter(|path| !current.contains_key(*path))
            .count();
        debug!(changed, removed, "Live data differs from baseline");

        Ok(true)
    }

    /// Checkpoint, then fingerprint the database file and attachment tree
    pub fn checkpointed_fingerprints(&self) -> BackupResult<Fingerprints> {
        self.database.checkpoint()?;

        with_file_access(self.database, || {
            fingerprint_live(&self.database_file, &self.attachments_dir)
        })
    }

    /// Record `fingerprints` as the new baseline
    ///
    /// Used by the backup creator with fingerprints taken from the artifact
    /// it just wrote, which were themselves captured after a checkpoint.
    pub fn store_baseline(&self, fingerprints: Fingerprints) -> BackupResult<()> {
        self.store.update(|manifest| {
            manifest.baseline_hashes = fingerprints;
            manifest.last_backup_check = Some(Utc::now());
            Ok(())
        })
    }

    /// Checkpoint, fingerprint the live data and store it as the baseline
    pub fn compute_and_store_baseline(&self) -> BackupResult<Fingerprints> {
        let fingerprints = self.checkpointed_fingerprints()?;
        self.store_baseline(fingerprints.clone())?;
        Ok(fingerprints)
    }
}

/// Whether enough time has passed since `last` for an automatic backup
pub fn frequency_allows(
    frequency: BackupFrequency,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match (frequency.min_interval(), last) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(interval), Some(last)) => now.signed_duration_since(last) >= interval,
    }
}
