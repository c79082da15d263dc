//! File tree helpers
//!
//! Walks, copies and measures directory trees. Relative paths are always
//! expressed with `/` separators so they compare equal across platforms.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{BackupError, BackupResult};

/// A regular file found under a tree root
#[derive(Debug, Clone)]
pub struct TreeFile {
    /// Path relative to the root, `/`-separated
    pub relative: String,
    /// Absolute path on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// List every regular file under `root`, sorted by relative path
///
/// A missing root is an empty tree. Symbolic links are skipped so a link
/// cannot pull files from outside the tree into a backup.
pub fn list_files(root: &Path) -> BackupResult<Vec<TreeFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            BackupError::Io(format!("Failed to walk {}: {}", root.display(), e))
        })?;

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            warn!(path = %entry.path().display(), "Skipping symbolic link");
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            BackupError::Io(format!("Failed to stat {}: {}", entry.path().display(), e))
        })?;

        files.push(TreeFile {
            relative: relative_key(root, entry.path())?,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Express `path` relative to `root` with `/` separators
pub fn relative_key(root: &Path, path: &Path) -> BackupResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        BackupError::Io(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    Ok(parts.join("/"))
}

/// Turn a `/`-separated relative key back into a path under `root`
///
/// Keys come from sidecar files on disk, so anything that would escape the
/// root is rejected.
pub fn resolve_relative(root: &Path, key: &str) -> BackupResult<PathBuf> {
    let relative = Path::new(key);

    let escapes = key.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

    if escapes {
        return Err(BackupError::Integrity(format!(
            "Refusing unsafe path in backup: {:?}",
            key
        )));
    }

    let mut path = root.to_path_buf();
    for part in key.split('/') {
        path.push(part);
    }
    Ok(path)
}

/// Copy one file, creating parent directories; returns bytes copied
pub fn copy_file(src: &Path, dst: &Path) -> BackupResult<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BackupError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    fs::copy(src, dst).map_err(|e| {
        BackupError::Io(format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    })
}

/// Copy every regular file under `src` into `dst`; returns bytes copied
pub fn copy_tree(src: &Path, dst: &Path) -> BackupResult<u64> {
    fs::create_dir_all(dst).map_err(|e| {
        BackupError::Io(format!("Failed to create {}: {}", dst.display(), e))
    })?;

    let mut total = 0;
    for file in list_files(src)? {
        total += copy_file(&file.path, &resolve_relative(dst, &file.relative)?)?;
    }
    Ok(total)
}

/// Total size in bytes of the regular files under `root`
pub fn tree_size(root: &Path) -> BackupResult<u64> {
    Ok(list_files(root)?.iter().map(|f| f.size).sum())
}

/// Remove a directory tree if it exists
pub fn remove_dir_if_exists(path: &Path) -> BackupResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::Io(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Remove a file if it exists
pub fn remove_file_if_exists(path: &Path) -> BackupResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::Io(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
