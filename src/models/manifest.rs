//! The persisted manifest
//!
//! One manifest per installation: the ordered backup history, the baseline
//! fingerprints of the live data, and when a backup was last recorded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BackupId, ChainId};
use super::record::{BackupKind, BackupRecord};
use crate::error::{BackupError, BackupResult};

/// Tracked path -> content fingerprint
pub type Fingerprints = BTreeMap<String, String>;

/// Root object of `manifest.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Backup history in creation order
    #[serde(default)]
    pub records: Vec<BackupRecord>,

    /// Fingerprints of the live data captured right after the last backup
    #[serde(default)]
    pub baseline_hashes: Fingerprints,

    /// When the baseline was last captured
    #[serde(default)]
    pub last_backup_check: Option<DateTime<Utc>>,
}

impl BackupManifest {
    /// Get a record by ID
    pub fn get(&self, id: BackupId) -> Option<&BackupRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Get a record by ID or fail with a "not found" error
    pub fn require(&self, id: BackupId) -> BackupResult<&BackupRecord> {
        self.get(id)
            .ok_or_else(|| BackupError::backup_not_found(id.to_string()))
    }

    /// Resolve user input (full UUID or `bk-xxxxxxxx`) to a record
    pub fn resolve(&self, input: &str) -> BackupResult<&BackupRecord> {
        let mut matches = self.records.iter().filter(|r| r.id.matches(input));

        match (matches.next(), matches.next()) {
            (Some(record), None) => Ok(record),
            (Some(_), Some(_)) => Err(BackupError::Config(format!(
                "Backup id {:?} is ambiguous; use the full id",
                input
            ))),
            (None, _) => Err(BackupError::backup_not_found(input)),
        }
    }

    /// Records of a chain, in the order they were added
    pub fn chain_members(&self, chain_id: ChainId) -> Vec<&BackupRecord> {
        self.records.iter().filter(|r| r.in_chain(chain_id)).collect()
    }

    /// The most recently added full backup
    pub fn newest_full(&self) -> Option<&BackupRecord> {
        self.records.iter().rev().find(|r| r.kind == BackupKind::Full)
    }

    /// The most recently added record of any kind
    pub fn latest(&self) -> Option<&BackupRecord> {
        self.records.last()
    }

    /// Append a record; records stay in the order they were added
    pub fn push(&mut self, record: BackupRecord) {
        self.records.push(record);
    }

    /// Remove the given records; returns what was removed
    pub fn remove_all(&mut self, ids: &[BackupId]) -> Vec<BackupRecord> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| ids.contains(&r.id));
        self.records = kept;
        removed
    }

    /// Total artifact size of all records
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }

    /// Order records by creation time (stable for equal timestamps)
    pub fn sort(&mut self) {
        self.records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
}
