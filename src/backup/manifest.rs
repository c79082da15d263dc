//! Manifest store
//!
//! `manifest.json` is the single source of truth for backup history. Every
//! read-modify-write goes through [`ManifestStore::update`], which holds an
//! in-process mutex plus an advisory lock on `manifest.lock` for the whole
//! cycle and rewrites the file atomically.
//!
//! A manifest that is missing or fails to parse is rebuilt by scanning the
//! artifact directories instead of being treated as fatal.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::artifact::{parse_dir_name, ArtifactIndex, PARTIAL_SUFFIX, SIDECAR_FILE};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupKind, BackupManifest, BackupRecord, ChainId};
use crate::storage::file_io::{read_json_optional, write_json_atomic};
use crate::storage::tree::{remove_dir_if_exists, tree_size};

/// Manifest file name inside the backup root
pub const MANIFEST_FILE: &str = "manifest.json";

const LOCK_FILE: &str = "manifest.lock";

/// Serialized access to `manifest.json`
pub struct ManifestStore {
    root: PathBuf,
    lock: Mutex<()>,
}

/// Advisory lock on `manifest.lock`, released on drop
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(root: &Path) -> BackupResult<Self> {
        fs::create_dir_all(root).map_err(|e| {
            BackupError::Io(format!(
                "Backup location {} is unavailable: {}",
                root.display(),
                e
            ))
        })?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(LOCK_FILE))
            .map_err(|e| BackupError::Storage(format!("Failed to open manifest lock: {}", e)))?;

        file.lock_exclusive()
            .map_err(|e| BackupError::Storage(format!("Failed to lock manifest: {}", e)))?;

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl ManifestStore {
    /// Create a store for the manifest in `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    /// The backup root this store manages
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to `manifest.json`
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Absolute path of a record's artifact directory
    pub fn artifact_dir(&self, record: &BackupRecord) -> PathBuf {
        self.root.join(&record.path)
    }

    /// Load the current manifest from disk
    pub fn load(&self) -> BackupResult<BackupManifest> {
        self.update(|manifest| Ok(manifest.clone()))
    }

    /// Load, mutate and atomically rewrite the manifest under the writer lock
    ///
    /// If `apply` fails nothing is written.
    pub fn update<T, F>(&self, apply: F) -> BackupResult<T>
    where
        F: FnOnce(&mut BackupManifest) -> BackupResult<T>,
    {
        let _guard = self.lock.lock().map_err(|e| {
            BackupError::Storage(format!("Failed to acquire manifest lock: {}", e))
        })?;
        let _file_lock = FileLock::acquire(&self.root)?;

        let (mut manifest, recovered) = self.read_or_recover()?;
        let before = manifest.clone();

        let output = apply(&mut manifest)?;

        if recovered || manifest != before {
            write_json_atomic(self.manifest_path(), &manifest)?;
            debug!(records = manifest.records.len(), "Manifest written");
        }

        Ok(output)
    }

    /// Read the manifest, falling back to a directory scan; the flag reports a rebuild
    fn read_or_recover(&self) -> BackupResult<(BackupManifest, bool)> {
        let path = self.manifest_path();

        match read_json_optional::<BackupManifest, _>(&path) {
            Ok(Some(manifest)) => Ok((manifest, false)),
            Ok(None) => {
                let manifest = scan_backup_root(&self.root)?;
                if manifest.records.is_empty() {
                    return Ok((manifest, false));
                }
                info!(
                    records = manifest.records.len(),
                    "No manifest found; rebuilt history from backup directories"
                );
                Ok((manifest, true))
            }
            Err(BackupError::Json(reason)) => {
                warn!(path = %path.display(), %reason, "Manifest is corrupt; rebuilding from backup directories");

                let aside = self.root.join(format!(
                    "{}.corrupt-{}",
                    MANIFEST_FILE,
                    Utc::now().format("%Y%m%d-%H%M%S")
                ));
                if let Err(e) = fs::rename(&path, &aside) {
                    warn!(error = %e, "Could not move corrupt manifest aside");
                }

                let manifest = scan_backup_root(&self.root)?;
                warn!(records = manifest.records.len(), "Recovered backup history heuristically");
                Ok((manifest, true))
            }
            Err(e) => Err(e),
        }
    }
}

/// Rebuild a manifest from the artifact directories under `root`
///
/// Directories with a readable sidecar contribute their exact record. Others
/// are inferred from their names: `full_` starts a chain, `incr_` extends the
/// chain of the closest earlier full, `pre_restore_` stands alone. Leftover
/// `.partial` directories are removed. Baselines are not recoverable, so the
/// next check sees changes and backs up.
pub fn scan_backup_root(root: &Path) -> BackupResult<BackupManifest> {
    let mut manifest = BackupManifest::default();

    if !root.exists() {
        return Ok(manifest);
    }

    let entries = fs::read_dir(root).map_err(|e| {
        BackupError::Io(format!("Failed to read backup directory: {}", e))
    })?;

    let mut inferred: Vec<(BackupKind, BackupRecord)> = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| {
            BackupError::Io(format!("Failed to read directory entry: {}", e))
        })?;

        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();

        if name.ends_with(PARTIAL_SUFFIX) {
            warn!(artifact = %name, "Removing incomplete artifact");
            remove_dir_if_exists(&path)?;
            continue;
        }

        let Some((kind, created_at)) = parse_dir_name(&name) else {
            continue;
        };

        if path.join(SIDECAR_FILE).exists() {
            match ArtifactIndex::read(&path) {
                Ok(index) => {
                    let mut record = index.record;
                    record.path = name;
                    manifest.records.push(record);
                    continue;
                }
                Err(e) => warn!(artifact = %name, error = %e, "Ignoring unreadable sidecar"),
            }
        }

        let size = tree_size(&path)?;
        let record = BackupRecord {
            id: BackupId::new(),
            kind,
            chain_id: None,
            parent_id: None,
            created_at,
            path: name,
            size,
        };
        inferred.push((kind, record));
    }

    // Link inferred records into chains by walking everything in time order
    let inferred_ids: Vec<BackupId> = inferred.iter().map(|(_, r)| r.id).collect();
    manifest.records.extend(inferred.into_iter().map(|(_, r)| r));
    manifest.sort();

    let mut current: Option<(ChainId, BackupId)> = None;
    for record in manifest.records.iter_mut() {
        let is_inferred = inferred_ids.contains(&record.id);

        match record.kind {
            BackupKind::Full => {
                if is_inferred {
                    record.chain_id = Some(ChainId::new());
                }
                current = record.chain_id.map(|chain| (chain, record.id));
            }
            BackupKind::Incremental => {
                if is_inferred {
                    if let Some((chain, last)) = current {
                        record.chain_id = Some(chain);
                        record.parent_id = Some(last);
                    }
                }
                if let Some(chain) = record.chain_id {
                    current = Some((chain, record.id));
                }
            }
            BackupKind::PreRestore => {}
        }
    }

    Ok(manifest)
}
