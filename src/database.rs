//! Database collaborator
//!
//! The engine never reads the database's contents. It only needs the
//! write-ahead journal flushed into the main file before hashing or copying,
//! and a chance for the host to quiesce connections around file operations.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::debug;

use crate::error::{BackupError, BackupResult};

/// Hooks the engine calls on the live database
pub trait Database: Send + Sync {
    /// Merge the write-ahead journal into the main file
    fn checkpoint(&self) -> BackupResult<()>;

    /// Called immediately before the engine reads or replaces database files
    fn before_file_operation(&self) -> BackupResult<()> {
        Ok(())
    }

    /// Called immediately after the engine is done with database files
    fn after_file_operation(&self) -> BackupResult<()> {
        Ok(())
    }
}

/// Plain SQLite database in WAL mode
///
/// Encrypted files cannot be checkpointed through this type; their
/// checkpoints fail with [`BackupError::Database`]. Hosts with an encrypted
/// database implement [`Database`] over their own connection instead.
pub struct SqliteDatabase {
    path: PathBuf,
}

impl SqliteDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_checkpoint(&self) -> rusqlite::Result<(i64, i64, i64)> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
    }
}

impl Database for SqliteDatabase {
    fn checkpoint(&self) -> BackupResult<()> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No database file yet; nothing to checkpoint");
            return Ok(());
        }

        let (busy, log_frames, checkpointed) = self.run_checkpoint().map_err(|err| {
            if err.sqlite_error_code() == Some(ErrorCode::NotADatabase) {
                BackupError::Database(format!(
                    "{} is not a plain SQLite database; encrypted databases need their own Database implementation",
                    self.path.display()
                ))
            } else {
                BackupError::from(err)
            }
        })?;

        if busy != 0 {
            return Err(BackupError::Database(format!(
                "Checkpoint of {} blocked by an active reader ({} of {} frames written)",
                self.path.display(),
                checkpointed,
                log_frames
            )));
        }

        debug!(path = %self.path.display(), log_frames, checkpointed, "Checkpoint complete");
        Ok(())
    }
}

/// A database with no journal; checkpoints are no-ops
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueFile;

impl Database for OpaqueFile {
    fn checkpoint(&self) -> BackupResult<()> {
        Ok(())
    }
}

/// Run `operation` between the database's before/after hooks
///
/// The after hook runs even when the operation fails; the operation's error
/// wins over a hook error.
pub fn with_file_access<T, F>(database: &dyn Database, operation: F) -> BackupResult<T>
where
    F: FnOnce() -> BackupResult<T>,
{
    database.before_file_operation()?;
    let result = operation();
    let released = database.after_file_operation();

    let value = result?;
    released?;
    Ok(value)
}

/// The `-wal` and `-shm` files SQLite keeps next to a database
pub fn journal_files(database: &Path) -> [PathBuf; 2] {
    let name = database
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    [
        database.with_file_name(format!("{}-wal", name)),
        database.with_file_name(format!("{}-shm", name)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_missing_file_is_ok() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::new(temp.path().join("absent.db"));
        db.checkpoint().unwrap();
        assert!(!temp.path().join("absent.db").exists());
    }

    #[test]
    fn test_checkpoint_flushes_wal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.db");

        let conn = Connection::open(&path).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        conn.execute_batch(
            "CREATE TABLE entries (id INTEGER PRIMARY KEY, note TEXT);
             INSERT INTO entries (note) VALUES ('first');",
        )
        .unwrap();

        SqliteDatabase::new(&path).checkpoint().unwrap();

        let [wal, _] = journal_files(&path);
        assert_eq!(std::fs::metadata(&wal).map(|m| m.len()).unwrap_or(0), 0);
        drop(conn);
    }

    #[test]
    fn test_checkpoint_rejects_foreign_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.db");
        std::fs::write(&path, vec![0x5a_u8; 8192]).unwrap();

        let err = SqliteDatabase::new(&path).checkpoint().unwrap_err();
        assert!(matches!(err, BackupError::Database(_)));
        assert!(err.to_string().contains("not a plain SQLite database"));

        // Left byte-for-byte as it was
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x5a_u8; 8192]);
    }

    #[test]
    fn test_journal_file_names() {
        let [wal, shm] = journal_files(Path::new("/data/app.db"));
        assert_eq!(wal, PathBuf::from("/data/app.db-wal"));
        assert_eq!(shm, PathBuf::from("/data/app.db-shm"));
    }
}
