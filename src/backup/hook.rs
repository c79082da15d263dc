//! Post-backup command
//!
//! Runs a user-configured shell command after each new backup. The command
//! sees the artifact through `CHAINBACK_BACKUP_PATH`, `CHAINBACK_BACKUP_KIND`
//! and `CHAINBACK_BACKUP_ID`.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::models::BackupRecord;

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run `command` for the backup stored at `artifact_dir`
pub fn run_post_backup_command(
    command: &str,
    record: &BackupRecord,
    artifact_dir: &Path,
) -> BackupResult<()> {
    let mut cmd = shell_command(command);
    cmd.env("CHAINBACK_BACKUP_PATH", artifact_dir)
        .env("CHAINBACK_BACKUP_KIND", record.kind.dir_prefix())
        .env("CHAINBACK_BACKUP_ID", record.id.as_uuid().to_string())
        .stdin(Stdio::null());

    let output = cmd
        .output()
        .map_err(|e| BackupError::Command(format!("failed to start {:?}: {}", command, e)))?;

    if !output.status.success() {
        return Err(BackupError::Command(format!(
            "{:?} exited with status {}: {}",
            command,
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    debug!(command, "Post-backup command finished");
    Ok(())
}

/// Run the configured command if any; failures are logged and swallowed
pub fn run_best_effort(command: Option<&str>, record: &BackupRecord, artifact_dir: &Path) {
    let Some(command) = command.map(str::trim).filter(|c| !c.is_empty()) else {
        return;
    };

    if let Err(e) = run_post_backup_command(command, record, artifact_dir) {
        warn!(backup = %record.id, error = %e, "Post-backup command failed");
    }
}
