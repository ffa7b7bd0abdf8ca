//! Remote Backup - Main entry point
//!
//! Uploads, downloads, lists and prunes backups on remote storage.

use anyhow::Result;
use clap::{Parser, Subcommand};
use remote_backup::{config::Config, utils, BackupDestination, ListFormat};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List backups on remote storage (all, latest, penult)
    List {
        #[arg(default_value = "all")]
        format: String,
    },

    /// Upload a local backup
    Upload {
        name: String,

        /// Upload as an increment of this local backup
        #[arg(long, value_name = "NAME")]
        diff_from: Option<String>,

        /// Directory holding local backups (overrides config)
        #[arg(long, value_name = "DIR")]
        local_dir: Option<PathBuf>,
    },

    /// Download a backup and everything it depends on
    Download {
        name: String,

        /// Directory holding local backups (overrides config)
        #[arg(long, value_name = "DIR")]
        local_dir: Option<PathBuf>,
    },

    /// Delete a backup from remote storage
    Delete { name: String },

    /// Keep only the newest backups on remote storage
    Prune {
        /// Number of backups to keep (overrides config)
        #[arg(long)]
        keep: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let destination = BackupDestination::from_config(&config)?;
    destination.connect().await?;
    tracing::debug!(
        "remote-backup v{} using {} storage at '{}'",
        env!("CARGO_PKG_VERSION"),
        destination.kind(),
        destination.path()
    );

    match args.command {
        Command::List { format } => {
            let format: ListFormat = format.parse()?;
            let backups = destination.backup_list().await?;
            let mut stdout = std::io::stdout().lock();
            remote_backup::destination::render_backups(&backups, format, &mut stdout)?;
        }
        Command::Upload {
            name,
            diff_from,
            local_dir,
        } => {
            let local_dir = local_dir.unwrap_or_else(|| config.general.local_backup_dir.clone());
            let diff_from = diff_from.map(|base| local_dir.join(base));
            let summary = destination
                .compressed_stream_upload(&local_dir.join(&name), &name, diff_from.as_deref())
                .await?;
            tracing::info!(
                "Upload of '{}' complete: {} files, {} hardlinks, {} sent",
                name,
                summary.files_archived,
                summary.hardlinks.len(),
                remote_backup::transfer::format_bytes(summary.compressed_bytes)
            );

            let keep = destination.backups_to_keep();
            if keep > 0 {
                let removed = destination.remove_old_backups(keep).await?;
                for backup in removed {
                    tracing::info!("Removed old backup '{}'", backup.name);
                }
            }
        }
        Command::Download { name, local_dir } => {
            destination.find_backup(&name).await?;
            let local_dir = local_dir.unwrap_or_else(|| config.general.local_backup_dir.clone());
            let summary = destination
                .compressed_stream_download(&name, &local_dir.join(&name))
                .await?;
            tracing::info!(
                "Download of '{}' complete: {}",
                name,
                summary.chain.join(" <- ")
            );
        }
        Command::Delete { name } => {
            destination.find_backup(&name).await?;
            destination.remove_backup(&name).await?;
        }
        Command::Prune { keep } => {
            let keep = keep.unwrap_or_else(|| destination.backups_to_keep());
            let removed = destination.remove_old_backups(keep).await?;
            tracing::info!("Pruned {} backups", removed.len());
        }
    }

    Ok(())
}
