//! Backup CLI commands
//!
//! Implements the `create`, `list`, `restore`, `rm` and `verify` commands.

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;

use crate::backup::{BackupManager, CancelToken, RestoreManager};
use crate::config::paths::BackupPaths;
use crate::config::settings::Settings;
use crate::display;
use crate::error::BackupResult;
use crate::models::BackupId;

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Back up one or more directories
    Create {
        /// Directories to back up
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List all backups
    #[command(alias = "ls")]
    List,

    /// Restore a backup into a directory
    Restore {
        /// Backup identifier
        id: String,

        /// Destination directory (default: ./restore-<id>)
        #[arg(long, value_name = "DIR")]
        to: Option<PathBuf>,

        /// Restore into a directory that already has content
        #[arg(long)]
        overwrite: bool,
    },

    /// Remove a backup
    Rm {
        /// Backup identifier
        id: String,

        /// Remove every backup of the same directory
        #[arg(long)]
        all: bool,
    },

    /// Check chains and artifacts for damage
    Verify,
}

/// Handle a backup command, returning the process exit code
pub fn handle_backup_command(
    paths: &BackupPaths,
    settings: &Settings,
    cmd: BackupCommands,
) -> BackupResult<u8> {
    let manager = BackupManager::new(paths.clone(), settings.clone());

    match cmd {
        BackupCommands::Create { paths: sources, timeout } => {
            let (cancel, _handle) = CancelToken::new(timeout.map(Duration::from_secs));
            let report = manager.create(&sources, &cancel)?;
            println!("{}", display::format_create_report(&report));
            Ok(report.exit_code())
        }

        BackupCommands::List => {
            let backups = manager.list()?;
            println!("{}", display::format_backup_list(&backups));
            Ok(0)
        }

        BackupCommands::Restore { id, to, overwrite } => {
            let id = BackupId::parse(&id)?;
            let dest = to.unwrap_or_else(|| RestoreManager::default_destination(id));

            let restore_manager = RestoreManager::new(paths.clone());
            let report = restore_manager.restore(id, &dest, overwrite)?;
            println!("{}", display::format_restore_report(&report));
            Ok(0)
        }

        BackupCommands::Rm { id, all } => {
            let id = BackupId::parse(&id)?;
            let removed = manager.remove(id, all)?;
            println!("{}", display::format_removed(&removed));
            Ok(0)
        }

        BackupCommands::Verify => {
            let report = manager.verify()?;
            println!("{}", display::format_verify_report(&report));
            Ok(if report.is_healthy() { 0 } else { 1 })
        }
    }
}
