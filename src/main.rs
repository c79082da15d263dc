use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chainback::backup::BackupEngine;
use chainback::cli::{handle_backup_command, BackupCommands};
use chainback::config::{EnginePaths, Settings};
use chainback::database::SqliteDatabase;

#[derive(Parser)]
#[command(
    name = "chainback",
    author = "Kaylee Beyene",
    version,
    about = "Backup and restore for a single-file database plus attachments",
    long_about = "chainback keeps full and incremental backup chains of an application's \
                  database file and attachment tree, refuses deletions that would leave \
                  no complete chain, and stages restores that are applied at the next start."
)]
struct Cli {
    /// Base data directory (defaults to the platform config directory)
    #[arg(long, global = true, env = "CHAINBACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "chainback=trace" (RUST_LOG wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Backup(BackupCommands),

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize paths and settings
    let paths = match &cli.data_dir {
        Some(dir) => EnginePaths::with_base_dir(dir.clone()),
        None => EnginePaths::new()?,
    };
    let settings = Settings::load_or_create(&paths)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_level.clone());
    chainback::logging::init(&level)?;

    match cli.command {
        Some(Commands::Backup(cmd)) => {
            let database_file = settings.apply_to(paths.clone()).database_file();
            let engine = BackupEngine::new(
                paths,
                settings,
                Arc::new(SqliteDatabase::new(database_file)),
            )?;
            handle_backup_command(&engine, cmd)?;
        }
        Some(Commands::Config) => {
            let settings_file = paths.settings_file();
            let resolved = settings.apply_to(paths);

            println!("chainback Configuration");
            println!("=======================");
            println!("Base directory:   {}", resolved.base_dir().display());
            println!("Database file:    {}", resolved.database_file().display());
            println!("Attachments:      {}", resolved.attachments_dir().display());
            println!("Backup directory: {}", resolved.backup_root().display());
            println!("Staging:          {}", resolved.staging_dir().display());
            println!(
                "Settings file:    {}{}",
                settings_file.display(),
                if settings_file.exists() { "" } else { " (defaults)" }
            );
            println!();
            println!("Settings:");
            println!("  Frequency:          {}", settings.backup.frequency);
            println!("  Retention:          {} day(s)", settings.backup.retention_days);
            println!("  Full refresh:       {} day(s)", settings.backup.full_refresh_days);
            println!("  Auto prune:         {}", settings.backup.auto_prune);
            println!(
                "  Post-backup command: {}",
                settings
                    .backup
                    .post_backup_command
                    .as_deref()
                    .unwrap_or("(none)")
            );
        }
        None => {
            println!("chainback - backup chains for a database and its attachments");
            println!();
            println!("Run 'chainback --help' for usage information.");
            println!("Run 'chainback status' to see the current backups.");
        }
    }

    Ok(())
}
