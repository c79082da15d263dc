//! Backup CLI commands
//!
//! Implements the operator commands on top of [`BackupEngine`].

use clap::{Subcommand, ValueEnum};

use crate::backup::{BackupEngine, RestorePoint, Trigger};
use crate::error::BackupResult;
use crate::models::BackupRecord;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Show backup status
    Status,

    /// Create a backup if anything changed
    Create {
        /// Always write a new full backup, even without changes
        #[arg(long)]
        full: bool,
    },

    /// List restore points, newest first
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Stage a restore point; it is applied at the next start
    Restore {
        /// Backup id (full UUID or bk-xxxxxxxx)
        backup: String,
    },

    /// Discard a staged restore
    Cancel,

    /// Apply a staged restore now (run before the application opens its database)
    Apply,

    /// Delete a backup and anything that depends on it
    Delete {
        /// Backup id (full UUID or bk-xxxxxxxx)
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete backups older than the retention window
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Run the backup pipeline for a lifecycle event
    Trigger {
        #[arg(value_enum)]
        event: TriggerArg,
    },
}

/// Lifecycle events accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TriggerArg {
    Login,
    Logout,
    SessionTimeout,
    ProcessExit,
    Manual,
}

impl From<TriggerArg> for Trigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Login => Trigger::Login,
            TriggerArg::Logout => Trigger::Logout,
            TriggerArg::SessionTimeout => Trigger::SessionTimeout,
            TriggerArg::ProcessExit => Trigger::ProcessExit,
            TriggerArg::Manual => Trigger::Manual,
        }
    }
}

/// Handle a backup command
pub fn handle_backup_command(engine: &BackupEngine, cmd: BackupCommands) -> BackupResult<()> {
    match cmd {
        BackupCommands::Status => {
            let status = engine.status()?;

            println!("Backup Status");
            println!("=============");
            println!("Location:        {}", status.backup_root.display());
            println!("Frequency:       {}", status.frequency);
            println!(
                "Backups:         {} in {} chain(s), {} complete",
                status.record_count, status.chain_count, status.complete_chain_count
            );
            println!("Total size:      {}", format_size(status.total_size_bytes));

            match &status.latest {
                Some(latest) => println!(
                    "Latest backup:   {} {} ({} ago)",
                    latest.kind,
                    latest.id,
                    format_duration(chrono::Utc::now().signed_duration_since(latest.created_at))
                ),
                None => println!("Latest backup:   none"),
            }

            if let Some(checked) = status.last_backup_check {
                println!(
                    "Last recorded:   {}",
                    checked.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }

            if let Some(pending) = &status.pending_restore {
                println!();
                println!(
                    "Restore of {} is staged and will be applied at next start.",
                    pending.record_id
                );
                println!("Cancel it with: chainback cancel");
            }
        }

        BackupCommands::Create { full } => {
            println!("Checking for changes...");
            match engine.create_backup(full)? {
                Some(record) => {
                    println!("Backup created: {} ({})", record.id, record.kind);
                    println!("Location: {}", engine.paths().backup_root().join(&record.path).display());
                    println!("Size: {}", format_size(record.size));
                }
                None if engine.pending_restore()?.is_some() => {
                    println!("A restore is pending; backups are paused until it is applied or cancelled.");
                }
                None => println!("No changes since the last backup."),
            }
        }

        BackupCommands::List { verbose } => {
            let points = engine.list_restore_points()?;

            if points.is_empty() {
                println!("No backups found.");
                println!("Create one with: chainback create");
                return Ok(());
            }

            println!("Restore Points");
            println!("==============");
            println!();

            for (i, point) in points.iter().enumerate() {
                let record = &point.record;
                let age = chrono::Utc::now().signed_duration_since(record.created_at);
                let markers = markers(point);

                if verbose {
                    println!(
                        "{}. {} [{}]{}\n   Created: {}\n   Path: {}\n   Size: {}\n   Age: {}\n   Dependents: {}\n   Chain: {}\n",
                        i + 1,
                        record.id,
                        record.kind,
                        markers,
                        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        record.path,
                        format_size(record.size),
                        format_duration(age),
                        point.dependent_count,
                        record
                            .chain_id
                            .map_or_else(|| "-".to_string(), |c| c.to_string()),
                    );
                } else {
                    println!(
                        "  {}. {} {} ({} ago, {}){}",
                        i + 1,
                        record.id,
                        record.kind,
                        format_duration(age),
                        format_size(record.size),
                        markers,
                    );
                }
            }

            println!();
            println!("Total: {} backup(s)", points.len());
        }

        BackupCommands::Restore { backup } => {
            let record = engine.resolve(&backup)?;
            let staging = engine.prepare_restore(record.id)?;

            println!("Restore staged");
            println!("==============");
            println!("Backup:  {} ({})", record.id, record.kind);
            println!(
                "Created: {}",
                record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Staging: {}", staging.display());
            println!();
            println!("The live data is untouched. The restore is applied at the next start,");
            println!("after a safety backup of the current data is taken.");
            println!("To apply it now (with the application closed): chainback apply");
            println!("To cancel: chainback cancel");
        }

        BackupCommands::Cancel => {
            if engine.cancel_restore()? {
                println!("Pending restore cancelled.");
            } else {
                println!("No restore was pending.");
            }
        }

        BackupCommands::Apply => match engine.apply_pending_restore_if_any()? {
            Some(id) => {
                println!("Restored backup {}.", id);
                println!("The previous data was saved as a pre-restore backup.");
            }
            None => println!("No restore is pending."),
        },

        BackupCommands::Delete { backup, force } => {
            let record = engine.resolve(&backup)?;
            let removal = engine.deletion_preview(record.id)?;

            println!("Delete Summary");
            println!("==============");
            print_records(&removal);
            println!();

            if !force {
                println!("To delete, run again with --force flag:");
                println!("  chainback delete {} --force", backup);
                return Ok(());
            }

            let removed = engine.delete(record.id)?;
            println!("Deleted {} backup(s).", removed.len());
        }

        BackupCommands::Prune { force } => {
            let candidates = engine.prune_candidates()?;
            let retention_days = engine.settings().backup.retention_days;

            if candidates.is_empty() {
                println!("No backups to prune.");
                println!("Current retention window: {} day(s)", retention_days);
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Retention window: {} day(s)", retention_days);
            println!("Older than the window (dependents are removed with their full backup):");
            print_records(&candidates);
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  chainback prune --force");
                return Ok(());
            }

            let report = engine.prune()?;
            println!(
                "Deleted {} backup(s), freed {}.",
                report.deleted.len(),
                format_size(report.freed_bytes())
            );
            for (record, reason) in &report.skipped {
                println!("Kept {}: {}", record.id, reason);
            }
        }

        BackupCommands::Trigger { event } => {
            let trigger = Trigger::from(event);
            match engine.on_trigger(trigger)? {
                Some(record) => println!("Backup created: {} ({})", record.id, record.kind),
                None => println!("No backup needed for {}.", trigger),
            }
        }
    }

    Ok(())
}

fn markers(point: &RestorePoint) -> String {
    let mut markers = String::new();
    if point.is_newest_in_chain && point.record.chain_id.is_some() {
        markers.push_str(" [newest]");
    }
    if point.is_protected {
        markers.push_str(" [protected]");
    }
    if !point.restorable {
        markers.push_str(" [unrestorable]");
    }
    markers
}

fn print_records(records: &[BackupRecord]) {
    for record in records {
        println!(
            "  {} {} ({}, {})",
            record.id,
            record.kind,
            record.created_at.format("%Y-%m-%d %H:%M"),
            format_size(record.size)
        );
    }
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
