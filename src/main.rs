use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use chainback::cli::{handle_backup_command, BackupCommands};
use chainback::config::{paths::BackupPaths, settings::Settings};
use chainback::config::paths::ROOT_ENV_VAR;
use chainback::BackupError;

#[derive(Parser)]
#[command(
    name = "chainback",
    version,
    about = "Incremental directory backups",
    long_about = "chainback keeps a chain of backups per directory: one full \
                  backup followed by incrementals holding only what changed. \
                  Any backup in a chain can be restored."
)]
struct Cli {
    /// Backup root holding the index and archives (default: ~/.backup)
    #[arg(short, long, global = true, value_name = "DIR", env = ROOT_ENV_VAR)]
    output: Option<PathBuf>,

    /// Log every file that is added, modified, deleted or skipped
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: BackupCommands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<BackupError>()
                .map_or(1, BackupError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let paths = BackupPaths::resolve(cli.output).context("Cannot determine backup root")?;
    let settings = Settings::load_or_default(&paths)
        .with_context(|| format!("Cannot read settings in {}", paths.root().display()))?;
    tracing::debug!("Using backup root {}", paths.root().display());

    Ok(handle_backup_command(&paths, &settings, cli.command)?)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_writer(std::io::stderr)
        .init();
}
