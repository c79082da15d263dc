//! Backup record model
//!
//! A record describes one artifact directory under the backup root. Records
//! are immutable once written to the manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BackupId, ChainId};

/// The kind of backup a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Database snapshot plus the whole attachment tree; heads a chain
    Full,
    /// Database snapshot plus changed attachments and tombstones
    Incremental,
    /// Safety snapshot taken just before a restore is applied
    PreRestore,
}

impl BackupKind {
    /// Prefix of the artifact directory name
    pub fn dir_prefix(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incr",
            BackupKind::PreRestore => "pre_restore",
        }
    }

    /// Whether the artifact carries a complete attachment tree by itself
    pub fn is_self_contained(&self) -> bool {
        !matches!(self, BackupKind::Incremental)
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
            BackupKind::PreRestore => write!(f, "pre-restore"),
        }
    }
}

/// One backup in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,

    #[serde(rename = "type")]
    pub kind: BackupKind,

    /// Chain membership; `None` for standalone pre-restore snapshots
    #[serde(default)]
    pub chain_id: Option<ChainId>,

    /// Previous chain member; `None` for full and pre-restore records
    #[serde(default)]
    pub parent_id: Option<BackupId>,

    pub created_at: DateTime<Utc>,

    /// Artifact directory name, relative to the backup root
    pub path: String,

    /// Artifact size in bytes
    #[serde(default)]
    pub size: u64,
}

impl BackupRecord {
    /// Create a record for a new full backup, starting a new chain
    pub fn full(created_at: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            id: BackupId::new(),
            kind: BackupKind::Full,
            chain_id: Some(ChainId::new()),
            parent_id: None,
            created_at,
            path: path.into(),
            size: 0,
        }
    }

    /// Create a record for an incremental backup following `parent`
    pub fn incremental(
        parent: &BackupRecord,
        created_at: DateTime<Utc>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: BackupId::new(),
            kind: BackupKind::Incremental,
            chain_id: parent.chain_id,
            parent_id: Some(parent.id),
            created_at,
            path: path.into(),
            size: 0,
        }
    }

    /// Create a standalone pre-restore safety record
    pub fn pre_restore(created_at: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            id: BackupId::new(),
            kind: BackupKind::PreRestore,
            chain_id: None,
            parent_id: None,
            created_at,
            path: path.into(),
            size: 0,
        }
    }

    /// Set the artifact size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Whether this record is a full backup
    pub fn is_full(&self) -> bool {
        self.kind == BackupKind::Full
    }

    /// Whether this record belongs to the given chain
    pub fn in_chain(&self, chain_id: ChainId) -> bool {
        self.chain_id == Some(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_inherits_chain() {
        let full = BackupRecord::full(Utc::now(), "full_x");
        let incr = BackupRecord::incremental(&full, Utc::now(), "incr_y");

        assert_eq!(incr.chain_id, full.chain_id);
        assert_eq!(incr.parent_id, Some(full.id));
        assert_eq!(incr.kind, BackupKind::Incremental);
    }

    #[test]
    fn test_pre_restore_is_standalone() {
        let record = BackupRecord::pre_restore(Utc::now(), "pre_restore_z");
        assert!(record.chain_id.is_none());
        assert!(record.parent_id.is_none());
        assert!(record.kind.is_self_contained());
    }

    #[test]
    fn test_serialized_field_names() {
        let record = BackupRecord::full(Utc::now(), "full_x").with_size(42);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["type"], "full");
        assert_eq!(value["path"], "full_x");
        assert_eq!(value["size"], 42);
        assert!(value["parent_id"].is_null());
    }
}
