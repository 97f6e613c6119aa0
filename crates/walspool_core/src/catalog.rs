//! Remote backup catalog access.
//!
//! The retrieval loop consumes the catalog through [`CatalogBackend`], a
//! two-operation interface: ask for the newest archived segment, and stream
//! one segment's bytes into a local file. [`SshBackend`] binds the interface
//! to `ssh` invocations of the `barman` CLI on the catalog host; tests swap
//! in an in-memory fake.

use std::fs::File;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::RestoreConfig;
use crate::error::{BackfillError, BackfillResult};
use crate::segment::SegmentId;

/// Label opening the `show-backup` output line that carries the newest
/// archived segment.
const LAST_SEGMENT_LABEL: &str = "Last available";

/// Catalog CLI invoked on the remote host.
const CATALOG_COMMAND: &str = "barman";

/// Access to the remote backup catalog.
///
/// # Implementors
///
/// - [`SshBackend`] - production binding over `ssh`
/// - test fakes - in-memory, for exercising the retrieval loop
#[async_trait]
pub trait CatalogBackend {
    /// Returns the most recent segment archived for the configured backup.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be reached or reports no last segment.
    /// Either way the run aborts; a missing answer means a misconfigured
    /// target, not something to retry.
    async fn last_segment(&self) -> BackfillResult<SegmentId>;

    /// Streams the raw bytes of `segment` into `sink`.
    ///
    /// The sink is a plain file handle so subprocess-backed implementations
    /// can hand it straight to the child as stdout instead of copying
    /// through the parent.
    ///
    /// # Errors
    ///
    /// Fails if the transfer terminates with a failure status. The caller
    /// owns the sink and cleans it up on failure.
    async fn fetch_segment(&self, segment: &SegmentId, sink: File) -> BackfillResult<()>;
}

/// Catalog backend that shells out to `barman` on the catalog host over SSH.
#[derive(Debug, Clone)]
pub struct SshBackend {
    config: RestoreConfig,
}

impl SshBackend {
    /// Creates a backend addressing the catalog described by `config`.
    #[must_use]
    pub fn new(config: RestoreConfig) -> Self {
        Self { config }
    }

    /// Arguments for the last-segment query:
    /// `<user>@<host> barman show-backup <server> <backup_id>`.
    fn query_args(&self) -> Vec<String> {
        vec![
            self.config.ssh_destination(),
            CATALOG_COMMAND.to_string(),
            "show-backup".to_string(),
            self.config.server_name.clone(),
            self.config.backup_id.clone(),
        ]
    }

    /// Arguments for a segment transfer:
    /// `<user>@<host> barman get-wal <server> <segment>`.
    fn transfer_args(&self, segment: &SegmentId) -> Vec<String> {
        vec![
            self.config.ssh_destination(),
            CATALOG_COMMAND.to_string(),
            "get-wal".to_string(),
            self.config.server_name.clone(),
            segment.to_string(),
        ]
    }
}

#[async_trait]
impl CatalogBackend for SshBackend {
    async fn last_segment(&self) -> BackfillResult<SegmentId> {
        let args = self.query_args();
        debug!(?args, "querying catalog for last archived segment");
        let output = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await?;
        if !output.status.success() {
            return Err(BackfillError::QueryFailed {
                status: output.status,
            });
        }
        scan_last_segment(&String::from_utf8_lossy(&output.stdout))
    }

    async fn fetch_segment(&self, segment: &SegmentId, sink: File) -> BackfillResult<()> {
        let args = self.transfer_args(segment);
        debug!(?args, "starting segment transfer");
        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let status = child.wait().await?;
        if !status.success() {
            return Err(BackfillError::TransferFailed {
                segment: segment.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Scans catalog query output for the last-segment line.
///
/// The identifier is the final whitespace-delimited token of the first line
/// whose trimmed form opens with [`LAST_SEGMENT_LABEL`].
fn scan_last_segment(output: &str) -> BackfillResult<SegmentId> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix(LAST_SEGMENT_LABEL) {
            let token = rest
                .split_whitespace()
                .last()
                .ok_or(BackfillError::LastSegmentNotFound)?;
            return token.parse();
        }
    }
    Err(BackfillError::LastSegmentNotFound)
}
