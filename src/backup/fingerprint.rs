//! Content fingerprints
//!
//! SHA-256 over file contents. Fingerprints never look at mtimes, so
//! copying a file or touching it does not count as a change.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{BackupError, BackupResult};
use crate::models::Fingerprints;
use crate::storage::tree::list_files;

/// Baseline key of the database file
pub const DATABASE_KEY: &str = "database";

/// Baseline key prefix of attachment files
pub const ATTACHMENT_PREFIX: &str = "attachments/";

/// SHA-256 of a file's contents as lowercase hex
pub fn fingerprint_file(path: &Path) -> BackupResult<String> {
    let file = File::open(path).map_err(|e| {
        BackupError::Io(format!("Failed to open {} for hashing: {}", path.display(), e))
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer).map_err(|e| {
            BackupError::Io(format!("Failed to read {} for hashing: {}", path.display(), e))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprints of every file in an attachment tree, keyed by relative path
pub fn fingerprint_tree(root: &Path) -> BackupResult<Fingerprints> {
    let mut fingerprints = Fingerprints::new();
    for file in list_files(root)? {
        fingerprints.insert(file.relative, fingerprint_file(&file.path)?);
    }
    Ok(fingerprints)
}

/// Fingerprints of the tracked live data: the database file and the attachment tree
///
/// A missing database file simply has no entry.
pub fn fingerprint_live(database: &Path, attachments: &Path) -> BackupResult<Fingerprints> {
    let mut fingerprints = Fingerprints::new();

    if database.exists() {
        fingerprints.insert(DATABASE_KEY.to_string(), fingerprint_file(database)?);
    }

    for (relative, hash) in fingerprint_tree(attachments)? {
        fingerprints.insert(format!("{}{}", ATTACHMENT_PREFIX, relative), hash);
    }

    Ok(fingerprints)
}
