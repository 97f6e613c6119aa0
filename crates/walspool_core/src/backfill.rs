//! Backward retrieval loop and segment materialization.
//!
//! Starting from the newest segment the catalog knows about, the loop walks
//! predecessors one at a time, fetching each missing segment into the spool
//! until it reaches one that is already present. That steady-state hit is the
//! normal outcome once a previous run has covered the backfill window.
//!
//! Materialization is crash-safe and idempotent: each transfer lands in a
//! randomized temporary file inside the spool directory and is published
//! under its segment name with an atomic rename only after it is verified
//! non-empty and the name is verified free. The temporary file is removed on
//! every other exit path, including cancellation of the in-flight run.

use std::fs::File;
use std::io;

use tempfile::Builder;
use tracing::{debug, info};

use crate::catalog::CatalogBackend;
use crate::config::RestoreConfig;
use crate::error::{BackfillError, BackfillResult};
use crate::segment::SegmentId;

/// Prefix for in-progress transfer files inside the spool directory.
///
/// Segment names are pure hex, so a prefixed, randomized temporary name can
/// never collide with or be mistaken for a real segment.
const TEMP_PREFIX: &str = ".walspool-";

/// One backfill run over a spool directory and a catalog backend.
///
/// Strictly sequential: one remote operation in flight at a time, one
/// segment materialized at a time. Each step's continue/stop decision
/// depends on the previous fetch having been published.
#[derive(Debug)]
pub struct Backfill<B> {
    config: RestoreConfig,
    catalog: B,
}

impl<B: CatalogBackend> Backfill<B> {
    /// Creates a run over the given spool configuration and catalog.
    #[must_use]
    pub fn new(config: RestoreConfig, catalog: B) -> Self {
        Self { config, catalog }
    }

    /// Walks backward from the catalog's newest segment, fetching every
    /// missing predecessor until one is already present in the spool.
    ///
    /// Returns the number of segments fetched by this run. Segments are
    /// requested in strictly decreasing order, each at most once.
    ///
    /// Dropping the returned future mid-transfer (cancellation) kills the
    /// in-flight fetch and removes its temporary file; segments already
    /// published stay, correctly, as completed work.
    ///
    /// # Errors
    ///
    /// Any failure is fatal to the whole run: a missing spool directory
    /// (checked before the first remote call), a failed catalog query, a
    /// failed or empty transfer, or a target name appearing mid-fetch.
    pub async fn run(&self) -> BackfillResult<u64> {
        let spool = self.config.spool_dir();
        if !spool.is_dir() {
            return Err(BackfillError::DestinationMissing {
                path: spool.to_path_buf(),
            });
        }

        info!("querying catalog for the last archived segment");
        let last = self.catalog.last_segment().await?;
        info!(segment = %last, "catalog reported last archived segment");

        let mut segment = last.decrement()?;
        let mut fetched = 0u64;
        loop {
            if self.config.segment_path(&segment.to_string()).is_file() {
                info!(segment = %segment, fetched, "segment already in spool, backfill complete");
                return Ok(fetched);
            }
            self.materialize(&segment).await?;
            fetched += 1;
            segment = segment.decrement()?;
        }
    }

    /// Fetches one segment through the temporary-file publication protocol.
    async fn materialize(&self, segment: &SegmentId) -> BackfillResult<()> {
        let name = segment.to_string();
        let target = self.config.segment_path(&name);

        // Created in the spool directory itself so the final rename stays on
        // one filesystem. The guard removes the file on every exit path
        // short of publication, cancellation included.
        let temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(self.config.spool_dir())?;
        debug!(segment = %name, temp = ?temp.path(), "transfer started");

        let sink = temp.as_file().try_clone()?;
        self.catalog.fetch_segment(segment, sink).await?;

        temp.as_file().sync_all()?;
        let bytes = temp.as_file().metadata()?.len();
        if bytes == 0 {
            return Err(BackfillError::EmptySegment { segment: name });
        }
        if target.exists() {
            return Err(BackfillError::SegmentAppeared { segment: name });
        }

        // Publication point: after the rename the segment is visible to
        // future runs and other readers under its final name.
        temp.persist_noclobber(&target).map_err(|err| {
            if err.error.kind() == io::ErrorKind::AlreadyExists {
                BackfillError::SegmentAppeared {
                    segment: name.clone(),
                }
            } else {
                BackfillError::Io(err.error)
            }
        })?;
        self.sync_spool_dir()?;

        info!(segment = %name, bytes, "fetched segment");
        Ok(())
    }

    /// Fsyncs the spool directory so the publication rename is durable.
    #[cfg(unix)]
    fn sync_spool_dir(&self) -> BackfillResult<()> {
        let dir = File::open(self.config.spool_dir())?;
        dir.sync_all()?;
        Ok(())
    }

    /// Directory fsync is not supported on Windows; the NTFS journal covers
    /// metadata durability there.
    #[cfg(not(unix))]
    fn sync_spool_dir(&self) -> BackfillResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBackend;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    fn seg(s: &str) -> SegmentId {
        s.parse().unwrap()
    }

    fn config_for(spool: &std::path::Path) -> RestoreConfig {
        RestoreConfig::new("catalog.test", "pg-main", "20260805T010203").destination(spool)
    }

    /// In-memory catalog: a fixed last segment plus a map of fetchable
    /// segment bodies. Records every call in order. Segments absent from the
    /// map transfer zero bytes, like a catalog that no longer has them.
    struct FakeCatalog {
        last: SegmentId,
        segments: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
        plant_target_in: Option<PathBuf>,
    }

    impl FakeCatalog {
        fn new(last: &str) -> Self {
            Self {
                last: seg(last),
                segments: HashMap::new(),
                calls: Mutex::new(Vec::new()),
                fail_on: None,
                plant_target_in: None,
            }
        }

        fn with_segment(mut self, name: &str, body: &[u8]) -> Self {
            self.segments.insert(name.to_string(), body.to_vec());
            self
        }

        fn failing_on(mut self, name: &str) -> Self {
            self.fail_on = Some(name.to_string());
            self
        }

        /// Makes every fetch also create the target file directly in the
        /// given spool, simulating a concurrent writer.
        fn planting_into(mut self, spool: PathBuf) -> Self {
            self.plant_target_in = Some(spool);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogBackend for FakeCatalog {
        async fn last_segment(&self) -> BackfillResult<SegmentId> {
            self.calls.lock().unwrap().push("query-last".to_string());
            Ok(self.last)
        }

        async fn fetch_segment(&self, segment: &SegmentId, mut sink: File) -> BackfillResult<()> {
            let name = segment.to_string();
            self.calls.lock().unwrap().push(name.clone());
            if self.fail_on.as_deref() == Some(name.as_str()) {
                use std::os::unix::process::ExitStatusExt;
                return Err(BackfillError::TransferFailed {
                    segment: name,
                    status: std::process::ExitStatus::from_raw(256),
                });
            }
            if let Some(body) = self.segments.get(&name) {
                sink.write_all(body).unwrap();
            }
            if let Some(spool) = &self.plant_target_in {
                fs::write(spool.join(&name), b"planted by someone else").unwrap();
            }
            Ok(())
        }
    }

    /// Writes a partial body, then never completes.
    struct HangingCatalog {
        last: SegmentId,
    }

    #[async_trait]
    impl CatalogBackend for HangingCatalog {
        async fn last_segment(&self) -> BackfillResult<SegmentId> {
            Ok(self.last)
        }

        async fn fetch_segment(&self, _segment: &SegmentId, mut sink: File) -> BackfillResult<()> {
            sink.write_all(b"partial bytes").unwrap();
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn spool_entries(spool: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(spool)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn predecessor_already_present_fetches_nothing() {
        let spool = tempdir().unwrap();
        fs::write(spool.path().join("000000010000000200000039"), b"wal").unwrap();
        let catalog = FakeCatalog::new("00000001000000020000003A");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let fetched = backfill.run().await.unwrap();

        assert_eq!(fetched, 0);
        assert_eq!(backfill.catalog.calls(), ["query-last"]);
    }

    #[tokio::test]
    async fn walks_back_to_first_existing_segment() {
        let spool = tempdir().unwrap();
        fs::write(spool.path().join("000000010000000200000036"), b"old").unwrap();
        let catalog = FakeCatalog::new("00000001000000020000003A")
            .with_segment("000000010000000200000039", b"wal 39")
            .with_segment("000000010000000200000038", b"wal 38")
            .with_segment("000000010000000200000037", b"wal 37");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let fetched = backfill.run().await.unwrap();

        assert_eq!(fetched, 3);
        assert_eq!(
            backfill.catalog.calls(),
            [
                "query-last",
                "000000010000000200000039",
                "000000010000000200000038",
                "000000010000000200000037",
            ]
        );
        assert_eq!(
            fs::read(spool.path().join("000000010000000200000038")).unwrap(),
            b"wal 38"
        );
        assert_eq!(
            spool_entries(spool.path()),
            [
                "000000010000000200000036",
                "000000010000000200000037",
                "000000010000000200000038",
                "000000010000000200000039",
            ]
        );
    }

    #[tokio::test]
    async fn walk_crosses_log_file_boundary() {
        let spool = tempdir().unwrap();
        fs::write(spool.path().join("0000000100000002000000FF"), b"old").unwrap();
        let catalog = FakeCatalog::new("000000010000000300000001")
            .with_segment("000000010000000300000000", b"wal");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let fetched = backfill.run().await.unwrap();

        assert_eq!(fetched, 1);
        assert!(spool.path().join("000000010000000300000000").is_file());
    }

    #[tokio::test]
    async fn empty_transfer_aborts_after_exact_fetch_count() {
        let spool = tempdir().unwrap();
        let catalog = FakeCatalog::new("00000001000000020000003A")
            .with_segment("000000010000000200000039", b"wal 39")
            .with_segment("000000010000000200000038", b"wal 38");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let err = backfill.run().await.unwrap_err();

        assert!(matches!(
            err,
            BackfillError::EmptySegment { ref segment } if segment == "000000010000000200000037"
        ));
        // The two good predecessors were published; the failed one left
        // neither a temporary file nor a target-named file behind.
        assert_eq!(
            spool_entries(spool.path()),
            ["000000010000000200000038", "000000010000000200000039"]
        );
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_residue() {
        let spool = tempdir().unwrap();
        let catalog =
            FakeCatalog::new("00000001000000020000003A").failing_on("000000010000000200000039");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let err = backfill.run().await.unwrap_err();

        assert!(matches!(err, BackfillError::TransferFailed { .. }));
        assert!(spool_entries(spool.path()).is_empty());
    }

    #[tokio::test]
    async fn target_appearing_mid_fetch_is_fatal() {
        let spool = tempdir().unwrap();
        let catalog = FakeCatalog::new("00000001000000020000003A")
            .with_segment("000000010000000200000039", b"wal 39")
            .planting_into(spool.path().to_path_buf());
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let err = backfill.run().await.unwrap_err();

        assert!(matches!(
            err,
            BackfillError::SegmentAppeared { ref segment } if segment == "000000010000000200000039"
        ));
        // The concurrent writer's file is surfaced, never overwritten.
        assert_eq!(
            fs::read(spool.path().join("000000010000000200000039")).unwrap(),
            b"planted by someone else"
        );
        assert_eq!(spool_entries(spool.path()), ["000000010000000200000039"]);
    }

    #[tokio::test]
    async fn missing_spool_aborts_before_any_remote_call() {
        let spool = tempdir().unwrap();
        let missing = spool.path().join("not-created");
        let catalog = FakeCatalog::new("00000001000000020000003A");
        let backfill = Backfill::new(config_for(&missing), catalog);

        let err = backfill.run().await.unwrap_err();

        assert!(matches!(err, BackfillError::DestinationMissing { .. }));
        assert!(backfill.catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_no_residue() {
        let spool = tempdir().unwrap();
        let catalog = HangingCatalog {
            last: seg("00000001000000020000003A"),
        };
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let outcome = tokio::time::timeout(Duration::from_millis(50), backfill.run()).await;

        assert!(outcome.is_err());
        assert!(spool_entries(spool.path()).is_empty());
    }

    #[tokio::test]
    async fn underflow_during_walk_is_fatal() {
        let spool = tempdir().unwrap();
        let catalog = FakeCatalog::new("000000000000000000000001")
            .with_segment("000000000000000000000000", b"epoch");
        let backfill = Backfill::new(config_for(spool.path()), catalog);

        let err = backfill.run().await.unwrap_err();

        assert!(matches!(err, BackfillError::SegmentUnderflow { .. }));
    }
}
