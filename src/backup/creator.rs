//! Backup creation
//!
//! Picks full or incremental, writes the artifact through an
//! [`ArtifactWriter`], records it in the manifest and refreshes the baseline.
//! Incrementals always carry a complete database snapshot; only the
//! attachment tree is incremental, diffed against the parent's sidecar.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::artifact::{ArtifactIndex, ArtifactWriter};
use super::chain::ChainIndex;
use super::detector::ChangeDetector;
use super::fingerprint::fingerprint_file;
use super::hook;
use super::manifest::ManifestStore;
use crate::config::{BackupSettings, EnginePaths};
use crate::database::{with_file_access, Database};
use crate::error::BackupResult;
use crate::models::{BackupKind, BackupManifest, BackupRecord, Fingerprints};
use crate::storage::tree::{copy_file, list_files, remove_dir_if_exists, resolve_relative, tree_size};

/// Writes new backups
pub struct BackupCreator<'a> {
    store: &'a ManifestStore,
    database: &'a dyn Database,
    paths: &'a EnginePaths,
    settings: &'a BackupSettings,
}

/// The previous chain member an incremental builds on
struct Parent {
    record: BackupRecord,
    index: ArtifactIndex,
}

impl<'a> BackupCreator<'a> {
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

    /// Back up the live data if it changed since the last backup
    ///
    /// Returns `None` when there is nothing new. `force_full` skips the
    /// change check and starts a new chain.
    pub fn create_backup(&self, force_full: bool) -> BackupResult<Option<BackupRecord>> {
        let detector = ChangeDetector::new(self.store, self.database, self.paths);

        if !force_full && !detector.has_changes()? {
            info!("No changes since last backup; nothing to do");
            return Ok(None);
        }

        let now = Utc::now();
        let manifest = self.store.load()?;
        let parent = if force_full {
            debug!("Full backup requested");
            None
        } else {
            self.choose_parent(&manifest, now)
        };

        let kind = if parent.is_some() {
            BackupKind::Incremental
        } else {
            BackupKind::Full
        };

        self.database.checkpoint()?;
        let (record, index, artifact_dir) = self.write_artifact(kind, parent.as_ref(), now)?;

        let pushed = record.clone();
        if let Err(e) = self.store.update(|m| {
            m.push(pushed);
            Ok(())
        }) {
            // Unrecorded artifacts would only resurface during recovery
            if let Err(cleanup) = remove_dir_if_exists(&artifact_dir) {
                warn!(path = %artifact_dir.display(), error = %cleanup, "Failed to remove unrecorded artifact");
            }
            return Err(e);
        }

        detector.store_baseline(index.captured_state())?;

        info!(
            backup = %record.id,
            kind = %record.kind,
            size = record.size,
            copied = index.copied.len(),
            tombstones = index.tombstones.len(),
            "Backup created"
        );

        hook::run_best_effort(
            self.settings.post_backup_command.as_deref(),
            &record,
            &artifact_dir,
        );

        Ok(Some(record))
    }

    /// Snapshot the live data as a standalone pre-restore record
    ///
    /// No change check and no baseline update: the snapshot exists only so
    /// the state replaced by a restore can be recovered.
    pub fn create_safety_snapshot(&self) -> BackupResult<BackupRecord> {
        let now = Utc::now();
        self.database.checkpoint()?;
        let (record, _, artifact_dir) = self.write_artifact(BackupKind::PreRestore, None, now)?;

        let pushed = record.clone();
        if let Err(e) = self.store.update(|m| {
            m.push(pushed);
            Ok(())
        }) {
            if let Err(cleanup) = remove_dir_if_exists(&artifact_dir) {
                warn!(path = %artifact_dir.display(), error = %cleanup, "Failed to remove unrecorded artifact");
            }
            return Err(e);
        }

        info!(backup = %record.id, size = record.size, "Pre-restore safety snapshot created");
        Ok(record)
    }

    /// The record an incremental should follow, or `None` for a new full
    fn choose_parent(&self, manifest: &BackupManifest, now: DateTime<Utc>) -> Option<Parent> {
        let Some(newest_full) = manifest.newest_full() else {
            info!("No full backup yet; starting a new chain");
            return None;
        };

        let age = now.signed_duration_since(newest_full.created_at);
        if age >= self.settings.full_refresh_interval() {
            info!(
                age_days = age.num_days(),
                "Newest full backup is due for refresh; starting a new chain"
            );
            return None;
        }

        let chain_id = newest_full.chain_id?;
        let index = ChainIndex::new(manifest);
        if !index.is_complete(chain_id) {
            warn!(chain = %chain_id, "Active chain is incomplete; starting a new chain");
            return None;
        }

        let record = index.chain_tip(chain_id).cloned()?;

        match ArtifactIndex::read(&self.store.artifact_dir(&record)) {
            Ok(index) => Some(Parent { record, index }),
            Err(e) => {
                warn!(parent = %record.id, error = %e, "Parent backup unreadable; starting a new chain");
                None
            }
        }
    }

    /// Copy the live data into a new artifact and publish it
    fn write_artifact(
        &self,
        kind: BackupKind,
        parent: Option<&Parent>,
        now: DateTime<Utc>,
    ) -> BackupResult<(BackupRecord, ArtifactIndex, PathBuf)> {
        let root = self.paths.ensure_backup_root()?;
        let writer = ArtifactWriter::create(&root, kind, now)?;

        let live_database = self.paths.database_file();
        let live_attachments = self.paths.attachments_dir();

        let (database, files, copied) = with_file_access(self.database, || {
            let database = if live_database.exists() {
                copy_file(&live_database, &writer.database_path())?;
                Some(fingerprint_file(&writer.database_path())?)
            } else {
                None
            };

            let mut files = Fingerprints::new();
            let mut copied = Vec::new();

            for file in list_files(&live_attachments)? {
                let unchanged_hash = match parent {
                    Some(parent) => {
                        let hash = fingerprint_file(&file.path)?;
                        (parent.index.files.get(&file.relative) == Some(&hash)).then_some(hash)
                    }
                    None => None,
                };

                if let Some(hash) = unchanged_hash {
                    files.insert(file.relative, hash);
                    continue;
                }

                let target = resolve_relative(&writer.attachments_dir(), &file.relative)?;
                copy_file(&file.path, &target)?;
                files.insert(file.relative.clone(), fingerprint_file(&target)?);
                copied.push(file.relative);
            }

            Ok((database, files, copied))
        })?;

        let tombstones: Vec<String> = match parent {
            Some(parent) => parent
                .index
                .files
                .keys()
                .filter(|relative| !files.contains_key(*relative))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let record = match (kind, parent) {
            (BackupKind::Incremental, Some(parent)) => {
                BackupRecord::incremental(&parent.record, now, writer.name())
            }
            (BackupKind::PreRestore, _) => BackupRecord::pre_restore(now, writer.name()),
            _ => BackupRecord::full(now, writer.name()),
        }
        .with_size(tree_size(writer.dir())?);

        let index = ArtifactIndex {
            record: record.clone(),
            database,
            files,
            copied,
            tombstones,
        };

        let artifact_dir = writer.publish(&index)?;
        Ok((record, index, artifact_dir))
    }
}
