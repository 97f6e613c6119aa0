//! # walspool core
//!
//! Backfill engine for WAL restore spools.
//!
//! Given a remote backup catalog and a local spool directory, the engine
//! walks backward from the newest archived segment, fetching every missing
//! predecessor until it finds one already present. Pre-populating the spool
//! this way removes on-demand fetch latency from a later point-in-time
//! restore.
//!
//! This crate provides:
//! - Fixed-width segment identifier arithmetic ([`SegmentId`])
//! - The backward retrieval loop with crash-safe, idempotent file
//!   materialization ([`Backfill`])
//! - The catalog access seam ([`CatalogBackend`]) and its SSH binding
//!   ([`SshBackend`])

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backfill;
mod catalog;
mod config;
mod error;
mod segment;

pub use backfill::Backfill;
pub use catalog::{CatalogBackend, SshBackend};
pub use config::{RestoreConfig, DEFAULT_REMOTE_USER, DEFAULT_SPOOL_DIR};
pub use error::{BackfillError, BackfillResult};
pub use segment::SegmentId;
