//! Backfill run configuration.

use std::path::{Path, PathBuf};

/// Default user for the SSH connection to the catalog host.
pub const DEFAULT_REMOTE_USER: &str = "barman";

/// Default spool directory the segments are materialized into.
pub const DEFAULT_SPOOL_DIR: &str = "/var/tmp/barman-wal-restore";

/// Configuration for one backfill run.
///
/// Carries everything the retrieval loop and the catalog backend need: where
/// to put segments locally, and how to address the remote catalog. All fields
/// pass through unchanged into the two remote operations.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Spool directory segments are written into. Must exist and be writable.
    pub destination: PathBuf,

    /// User for the SSH connection to the catalog host.
    pub user: String,

    /// Host the backup catalog runs on.
    pub host: String,

    /// Source system name as configured in the catalog.
    pub server_name: String,

    /// Backup identifier scoping the last-segment query.
    pub backup_id: String,
}

impl RestoreConfig {
    /// Creates a configuration with the default user and spool directory.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        server_name: impl Into<String>,
        backup_id: impl Into<String>,
    ) -> Self {
        Self {
            destination: PathBuf::from(DEFAULT_SPOOL_DIR),
            user: DEFAULT_REMOTE_USER.to_string(),
            host: host.into(),
            server_name: server_name.into(),
            backup_id: backup_id.into(),
        }
    }

    /// Sets the spool directory.
    #[must_use]
    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = path.into();
        self
    }

    /// Sets the SSH user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Returns the `user@host` SSH destination.
    #[must_use]
    pub fn ssh_destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Returns the path a segment with the given name would occupy.
    #[must_use]
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.destination.join(name)
    }

    /// Returns the spool directory.
    #[must_use]
    pub fn spool_dir(&self) -> &Path {
        &self.destination
    }
}
