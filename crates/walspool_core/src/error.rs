//! Error types for the backfill engine.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type for backfill operations.
pub type BackfillResult<T> = Result<T, BackfillError>;

/// Errors that can occur while backfilling the WAL spool.
///
/// Every variant is fatal: the tool never retries, it surfaces the failed
/// phase to the operator and stops. Re-running after the underlying cause is
/// fixed is safe because published segments are never overwritten.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The spool directory does not exist.
    #[error("destination directory does not exist: {path:?}")]
    DestinationMissing {
        /// The configured spool path.
        path: PathBuf,
    },

    /// A segment identifier had the wrong width or non-hex characters.
    #[error("invalid segment identifier: {value:?}")]
    InvalidSegmentId {
        /// The rejected input.
        value: String,
    },

    /// The predecessor of the first possible segment was requested.
    #[error("segment identifier underflow: {value} has no predecessor")]
    SegmentUnderflow {
        /// The identifier that cannot be decremented.
        value: String,
    },

    /// The catalog query command exited with a failure status.
    #[error("catalog query failed with {status}")]
    QueryFailed {
        /// Exit status of the remote query command.
        status: ExitStatus,
    },

    /// The catalog response contained no last-segment line.
    #[error("no last archived segment reported for this backup")]
    LastSegmentNotFound,

    /// The transfer command for a segment exited with a failure status.
    #[error("transfer of segment {segment} failed with {status}")]
    TransferFailed {
        /// The segment being fetched.
        segment: String,
        /// Exit status of the remote transfer command.
        status: ExitStatus,
    },

    /// A transfer completed but produced no bytes.
    #[error("segment {segment} transferred empty; it may not exist on the catalog side")]
    EmptySegment {
        /// The segment being fetched.
        segment: String,
    },

    /// The target file appeared between the existence check and publication.
    #[error("segment {segment} appeared in the spool mid-fetch; another writer is active")]
    SegmentAppeared {
        /// The segment whose name was taken.
        segment: String,
    },
}
