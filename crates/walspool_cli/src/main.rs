//! walspool CLI
//!
//! Backfills a WAL restore spool from a remote Barman catalog: walks
//! backward from the newest archived segment of a backup, fetching each
//! missing predecessor over SSH until one is already present locally.
//!
//! Interrupting the run (Ctrl-C) cancels the in-flight transfer and removes
//! its temporary file; segments already published stay in the spool.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use walspool_core::{Backfill, RestoreConfig, SshBackend, DEFAULT_REMOTE_USER, DEFAULT_SPOOL_DIR};

/// Backfill a WAL restore spool from a remote backup catalog.
#[derive(Parser)]
#[command(name = "walspool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// WAL destination directory: a restore spool or a pg_wal directory
    #[arg(short = 'd', long, default_value = DEFAULT_SPOOL_DIR)]
    destination: PathBuf,

    /// User for the ssh connection to the catalog host
    #[arg(short = 'U', long, default_value = DEFAULT_REMOTE_USER)]
    user: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Host the backup catalog runs on
    #[arg(value_name = "BARMAN_HOST")]
    host: String,

    /// Source server name as configured in the catalog
    #[arg(value_name = "SERVER_NAME")]
    server_name: String,

    /// ID of the backup whose WAL window is being backfilled
    #[arg(value_name = "BACKUP_ID")]
    backup_id: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RestoreConfig::new(cli.host, cli.server_name, cli.backup_id)
        .user(cli.user)
        .destination(cli.destination);
    let backend = SshBackend::new(config.clone());
    let backfill = Backfill::new(config, backend);

    tokio::select! {
        result = backfill.run() => {
            let fetched = result?;
            info!(fetched, "spool backfill finished");
        }
        _ = tokio::signal::ctrl_c() => {
            // Dropping the run future kills the in-flight transfer and
            // removes its temporary file. Not an error: exit clean.
            info!("interrupted, shutting down");
        }
    }

    Ok(())
}
