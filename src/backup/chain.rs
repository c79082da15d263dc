//! Chain analysis over a manifest
//!
//! Everything here is derived on demand from the manifest's records: chain
//! ancestry, completeness, dependents, and whether a record may be deleted.

use std::collections::HashSet;

use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupKind, BackupManifest, BackupRecord, ChainId};

/// Read-only view answering chain questions about a manifest
///
/// Chain completeness is computed once when the index is built.
pub struct ChainIndex<'a> {
    manifest: &'a BackupManifest,
    complete: HashSet<ChainId>,
}

impl<'a> ChainIndex<'a> {
    pub fn new(manifest: &'a BackupManifest) -> Self {
        let mut index = Self {
            manifest,
            complete: HashSet::new(),
        };
        index.complete = index
            .chain_ids()
            .into_iter()
            .filter(|c| index.check_complete(*c))
            .collect();
        index
    }

    fn position(&self, id: BackupId) -> Option<usize> {
        self.manifest.records.iter().position(|r| r.id == id)
    }

    /// Records needed to restore `id`, from the chain's full to `id` itself
    ///
    /// Fails with an integrity error when a link is missing, crosses chains,
    /// or loops.
    pub fn ancestry(&self, id: BackupId) -> BackupResult<Vec<&'a BackupRecord>> {
        let target = self.manifest.require(id)?;
        let mut path = vec![target];
        let mut current = target;

        while current.kind == BackupKind::Incremental {
            let parent_id = current.parent_id.ok_or_else(|| {
                BackupError::Integrity(format!(
                    "Incremental backup {} has no parent",
                    current.id
                ))
            })?;

            let parent = self.manifest.get(parent_id).ok_or_else(|| {
                BackupError::Integrity(format!(
                    "Backup {} depends on {}, which is missing",
                    current.id, parent_id
                ))
            })?;

            if parent.kind == BackupKind::PreRestore || parent.chain_id != current.chain_id {
                return Err(BackupError::Integrity(format!(
                    "Backup {} points outside its chain ({})",
                    current.id, parent_id
                )));
            }

            if path.len() > self.manifest.records.len() {
                return Err(BackupError::Integrity(format!(
                    "Chain of backup {} contains a cycle",
                    id
                )));
            }

            path.push(parent);
            current = parent;
        }

        path.reverse();
        Ok(path)
    }

    /// Whether `id` can be restored (its whole ancestry resolves)
    pub fn is_restorable(&self, id: BackupId) -> bool {
        self.ancestry(id).is_ok()
    }

    /// Records that cannot be restored without `id`
    ///
    /// For a full backup that is every other member of its chain; for an
    /// incremental it is every later record whose ancestry passes through it.
    pub fn dependents(&self, id: BackupId) -> Vec<&'a BackupRecord> {
        let Some(record) = self.manifest.get(id) else {
            return Vec::new();
        };

        match (record.kind, record.chain_id) {
            (BackupKind::Full, Some(chain_id)) => self
                .manifest
                .records
                .iter()
                .filter(|r| r.id != id && r.in_chain(chain_id))
                .collect(),
            (BackupKind::Incremental, _) => {
                let mut reached: HashSet<BackupId> = HashSet::from([id]);
                let mut dependents = Vec::new();
                // Follow parent links until nothing new is reached; list order is not trusted
                loop {
                    let before = dependents.len();
                    for candidate in &self.manifest.records {
                        let follows = candidate
                            .parent_id
                            .map_or(false, |parent| reached.contains(&parent));
                        if follows && reached.insert(candidate.id) {
                            dependents.push(candidate);
                        }
                    }
                    if dependents.len() == before {
                        break;
                    }
                }
                dependents
            }
            _ => Vec::new(),
        }
    }

    /// Whether `id` is the last record of its chain (always true for standalone records)
    pub fn is_newest_in_chain(&self, id: BackupId) -> bool {
        let Some(record) = self.manifest.get(id) else {
            return false;
        };
        match record.chain_id {
            Some(chain_id) => self
                .manifest
                .records
                .iter()
                .rev()
                .find(|r| r.in_chain(chain_id))
                .map_or(false, |newest| newest.id == id),
            None => true,
        }
    }

    /// Chains in order of first appearance
    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut seen = Vec::new();
        for chain_id in self.manifest.records.iter().filter_map(|r| r.chain_id) {
            if !seen.contains(&chain_id) {
                seen.push(chain_id);
            }
        }
        seen
    }

    /// The full backup heading a chain, if present
    pub fn chain_head(&self, chain_id: ChainId) -> Option<&'a BackupRecord> {
        self.manifest
            .records
            .iter()
            .find(|r| r.is_full() && r.in_chain(chain_id))
    }

    /// End of the parent links starting at the chain's full
    ///
    /// When two records claim the same parent the later-added one wins.
    pub fn chain_tip(&self, chain_id: ChainId) -> Option<&'a BackupRecord> {
        let mut tip = self.chain_head(chain_id)?;
        for _ in 0..self.manifest.records.len() {
            let child = self
                .manifest
                .records
                .iter()
                .rev()
                .find(|r| r.parent_id == Some(tip.id) && r.in_chain(chain_id));
            match child {
                Some(child) => tip = child,
                None => break,
            }
        }
        Some(tip)
    }

    fn check_complete(&self, chain_id: ChainId) -> bool {
        let members = self.manifest.chain_members(chain_id);
        let fulls = members.iter().filter(|r| r.is_full()).count();
        fulls == 1 && members.iter().all(|r| self.is_restorable(r.id))
    }

    /// A chain is complete when it has exactly one full and every member restores
    pub fn is_complete(&self, chain_id: ChainId) -> bool {
        self.complete.contains(&chain_id)
    }

    /// Number of complete chains
    pub fn complete_chain_count(&self) -> usize {
        self.complete.len()
    }

    /// Whether a full backup was added to the manifest after `id`
    pub fn has_newer_full(&self, id: BackupId) -> bool {
        let Some(position) = self.position(id) else {
            return false;
        };
        self.manifest.records[position + 1..]
            .iter()
            .any(|r| r.is_full())
    }

    /// Records removed by deleting `id`, or a protection error
    ///
    /// Full backups with dependents may only go when a newer full exists, and
    /// then take their whole chain with them. Incrementals may only go when
    /// nothing depends on them. No deletion may leave zero complete chains
    /// behind when at least one existed before.
    pub fn deletion_set(&self, id: BackupId) -> BackupResult<Vec<BackupId>> {
        let record = self.manifest.require(id)?;

        let removal = match record.kind {
            BackupKind::PreRestore => return Ok(vec![id]),
            BackupKind::Incremental => {
                let dependents = self.dependents(id);
                if !dependents.is_empty() {
                    return Err(BackupError::protected(
                        id.to_string(),
                        format!(
                            "{} later incremental backup(s) depend on it",
                            dependents.len()
                        ),
                    ));
                }
                vec![id]
            }
            BackupKind::Full => {
                let dependents = self.dependents(id);
                if !dependents.is_empty() && !self.has_newer_full(id) {
                    return Err(BackupError::protected(
                        id.to_string(),
                        format!(
                            "{} backup(s) depend on it and no newer full backup exists",
                            dependents.len()
                        ),
                    ));
                }
                std::iter::once(id)
                    .chain(dependents.iter().map(|r| r.id))
                    .collect()
            }
        };

        // Removing a chain's tip leaves the chain complete; removing a full
        // takes its whole chain, and other chains never depend on it
        if record.is_full() && !self.complete.is_empty() {
            let survivor = self.complete.iter().any(|c| Some(*c) != record.chain_id);
            if !survivor {
                return Err(BackupError::protected(
                    id.to_string(),
                    "deleting it would leave no complete backup chain",
                ));
            }
        }

        Ok(removal)
    }

    /// Why `id` may not be deleted, if it is protected
    pub fn protection_reason(&self, id: BackupId) -> Option<String> {
        match self.deletion_set(id) {
            Err(BackupError::Protected { reason, .. }) => Some(reason),
            _ => None,
        }
    }

    /// Whether deleting `id` is currently forbidden
    pub fn is_protected(&self, id: BackupId) -> bool {
        self.protection_reason(id).is_some()
    }
}
