//! Artifact directories
//!
//! Each backup lives in its own directory under the backup root:
//!
//! ```text
//! full_20261019-143022-123/
//!   backup.json      sidecar: record, attachment fingerprints, tombstones
//!   database.db      database snapshot
//!   attachments/     whole tree (full, pre-restore) or changed files (incremental)
//! ```
//!
//! Artifacts are assembled in `<name>.partial/` and renamed into place only
//! once complete, so a crash or a vanished volume never leaves a directory
//! that looks like a finished backup.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::fingerprint::{ATTACHMENT_PREFIX, DATABASE_KEY};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupKind, BackupRecord, Fingerprints};
use crate::storage::file_io::{read_json_required, write_json_atomic};
use crate::storage::tree::remove_dir_if_exists;

/// Sidecar file inside every artifact directory
pub const SIDECAR_FILE: &str = "backup.json";

/// Database snapshot inside every artifact directory
pub const DATABASE_SNAPSHOT: &str = "database.db";

/// Attachment subtree inside every artifact directory
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Suffix of artifact directories still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Contents of `backup.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    /// The record as written to the manifest
    pub record: BackupRecord,

    /// Fingerprint of the database snapshot; `None` when there was no database
    #[serde(default)]
    pub database: Option<String>,

    /// Complete attachment tree at capture time, relative path -> fingerprint
    #[serde(default)]
    pub files: Fingerprints,

    /// Attachment files physically stored in this artifact
    #[serde(default)]
    pub copied: Vec<String>,

    /// Attachment files deleted since the parent backup
    #[serde(default)]
    pub tombstones: Vec<String>,
}

impl ArtifactIndex {
    /// Read the sidecar of an artifact directory
    pub fn read(artifact_dir: &Path) -> BackupResult<Self> {
        read_json_required(artifact_dir.join(SIDECAR_FILE)).map_err(|e| {
            BackupError::Integrity(format!(
                "Unreadable backup index in {}: {}",
                artifact_dir.display(),
                e
            ))
        })
    }

    /// The captured state keyed the way live fingerprints are
    pub fn captured_state(&self) -> Fingerprints {
        let mut state: Fingerprints = self
            .files
            .iter()
            .map(|(relative, hash)| (format!("{}{}", ATTACHMENT_PREFIX, relative), hash.clone()))
            .collect();
        if let Some(hash) = &self.database {
            state.insert(DATABASE_KEY.to_string(), hash.clone());
        }
        state
    }
}

/// Directory name for an artifact of `kind` created at `at`
pub fn artifact_dir_name(kind: BackupKind, at: DateTime<Utc>) -> String {
    format!("{}_{}", kind.dir_prefix(), at.format(TIMESTAMP_FORMAT))
}

/// Recover kind and creation time from an artifact directory name
///
/// A `-N` suffix added to avoid collisions is ignored.
pub fn parse_dir_name(name: &str) -> Option<(BackupKind, DateTime<Utc>)> {
    // pre_restore_ must be tried before the shorter prefixes
    let (kind, rest) = [BackupKind::PreRestore, BackupKind::Full, BackupKind::Incremental]
        .into_iter()
        .find_map(|kind| {
            name.strip_prefix(kind.dir_prefix())
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|rest| (kind, rest))
        })?;

    Some((kind, parse_timestamp(rest.get(..19)?)?))
}

/// Parse `YYYYMMDD-HHMMSS-mmm`
fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    if !stamp.is_ascii() {
        return None;
    }

    let parts: Vec<&str> = stamp.split('-').collect();
    let [date_part, time_part, millis_part] = parts.as_slice() else {
        return None;
    };

    if date_part.len() != 8 || time_part.len() != 6 || millis_part.len() != 3 {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;
    let millis: u32 = millis_part.parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;

    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}

/// An artifact directory under construction
///
/// Dropping the writer without publishing removes the partial directory.
pub struct ArtifactWriter {
    name: String,
    final_dir: PathBuf,
    partial_dir: PathBuf,
    published: bool,
}

impl ArtifactWriter {
    /// Start a new artifact of `kind` under `root`
    pub fn create(root: &Path, kind: BackupKind, at: DateTime<Utc>) -> BackupResult<Self> {
        let base = artifact_dir_name(kind, at);
        let mut name = base.clone();
        let mut attempt = 1;
        while root.join(&name).exists() || root.join(format!("{}{}", name, PARTIAL_SUFFIX)).exists() {
            name = format!("{}-{}", base, attempt);
            attempt += 1;
        }

        let final_dir = root.join(&name);
        let partial_dir = root.join(format!("{}{}", name, PARTIAL_SUFFIX));

        fs::create_dir_all(partial_dir.join(ATTACHMENTS_DIR)).map_err(|e| {
            BackupError::Io(format!(
                "Failed to create artifact directory {}: {}",
                partial_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            name,
            final_dir,
            partial_dir,
            published: false,
        })
    }

    /// Directory name the artifact will be published under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where files are written until publication
    pub fn dir(&self) -> &Path {
        &self.partial_dir
    }

    /// Path of the database snapshot inside the artifact
    pub fn database_path(&self) -> PathBuf {
        self.partial_dir.join(DATABASE_SNAPSHOT)
    }

    /// Root of the attachment subtree inside the artifact
    pub fn attachments_dir(&self) -> PathBuf {
        self.partial_dir.join(ATTACHMENTS_DIR)
    }

    /// Write the sidecar and move the artifact into its final place
    pub fn publish(mut self, index: &ArtifactIndex) -> BackupResult<PathBuf> {
        write_json_atomic(self.partial_dir.join(SIDECAR_FILE), index)?;

        fs::rename(&self.partial_dir, &self.final_dir).map_err(|e| {
            BackupError::Io(format!(
                "Failed to publish artifact {}: {}",
                self.final_dir.display(),
                e
            ))
        })?;

        self.published = true;
        Ok(self.final_dir.clone())
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if !self.published {
            if let Err(e) = remove_dir_if_exists(&self.partial_dir) {
                warn!(path = %self.partial_dir.display(), error = %e, "Failed to remove partial artifact");
            }
        }
    }
}
