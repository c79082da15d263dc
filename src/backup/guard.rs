//! Deletion guard
//!
//! The only path by which records leave the manifest. Protection is decided
//! by [`ChainIndex::deletion_set`] against the manifest as it is on disk at
//! the moment of deletion, never against a caller's cached view.

use tracing::{info, warn};

use super::chain::ChainIndex;
use super::manifest::ManifestStore;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupRecord};
use crate::storage::tree::{remove_dir_if_exists, resolve_relative};

/// Deletes backups without ever breaking the last complete chain
pub struct DeletionGuard<'a> {
    store: &'a ManifestStore,
}

impl<'a> DeletionGuard<'a> {
    pub fn new(store: &'a ManifestStore) -> Self {
        Self { store }
    }

    /// Delete `id` and everything that depends on it, if allowed
    ///
    /// Returns the removed records. Artifacts are removed newest first, so
    /// if a directory cannot be removed the records already gone never
    /// include a parent of one that stays.
    pub fn delete(&self, id: BackupId) -> BackupResult<Vec<BackupRecord>> {
        let root = self.store.root().to_path_buf();

        let (removed, failure) = self.store.update(|manifest| {
            let removal = match ChainIndex::new(manifest).deletion_set(id) {
                Ok(removal) => removal,
                Err(e) => {
                    if e.is_protected() {
                        info!(backup = %id, error = %e, "Deletion refused");
                    }
                    return Err(e);
                }
            };

            let doomed: Vec<BackupRecord> = manifest
                .records
                .iter()
                .rev()
                .filter(|r| removal.contains(&r.id))
                .cloned()
                .collect();

            let mut gone = Vec::new();
            let mut failure: Option<BackupError> = None;

            for record in &doomed {
                let outcome = resolve_relative(&root, &record.path)
                    .and_then(|dir| remove_dir_if_exists(&dir));
                match outcome {
                    Ok(()) => gone.push(record.id),
                    Err(e) => {
                        warn!(backup = %record.id, error = %e, "Failed to remove backup artifact");
                        failure = Some(e);
                        break;
                    }
                }
            }

            Ok((manifest.remove_all(&gone), failure))
        })?;

        if let Some(e) = failure {
            return Err(e);
        }

        info!(backup = %id, removed = removed.len(), "Backup deleted");
        Ok(removed)
    }
}
