//! Release embargoed archives once their embargo has lapsed.
//!
//! Objects are copied from the private container into the public container
//! under the same key. A public object already holding that key is deleted
//! first. The private copy is kept, so a rerun after a partial failure simply
//! copies everything again.

use std::{collections::HashSet, sync::Arc};

use blob_store::BlobStore;
use chrono::NaiveDate;
use data_model::{ArchiveNaming, CutoffDate, RecordDate};
use metrics::unembargo_stats;
use tracing::{error, info};

use crate::error::{EmbargoError, Result};

/// No measurement data predates this year.
pub const EPOCH_YEAR: i32 = 2009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    ListingDest,
    ListingSource,
    Copying,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub prefix: String,
    /// Private objects copied into the public container.
    pub copied: usize,
    /// Of those, how many replaced an existing public object.
    pub replaced: usize,
    pub state: MigrationState,
}

impl MigrationReport {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            copied: 0,
            replaced: 0,
            state: MigrationState::Idle,
        }
    }

    fn advance(&mut self, state: MigrationState) {
        info!(prefix = %self.prefix, from = ?self.state, to = ?state, "unembargo state");
        self.state = state;
    }
}

pub struct UnembargoMigrator {
    store: Arc<dyn BlobStore>,
    private_container: String,
    public_container: String,
    naming: ArchiveNaming,
    metrics: unembargo_stats::Metrics,
}

impl UnembargoMigrator {
    pub fn new(
        store: Arc<dyn BlobStore>,
        private_container: &str,
        public_container: &str,
        naming: ArchiveNaming,
    ) -> Self {
        Self {
            store,
            private_container: private_container.to_string(),
            public_container: public_container.to_string(),
            naming,
            metrics: unembargo_stats::Metrics::new(),
        }
    }

    /// Release the archives of `date` if `date` is old enough relative to
    /// `today`.
    #[tracing::instrument(skip(self))]
    pub async fn unembargo_day(&self, date: u32, today: NaiveDate) -> Result<MigrationReport> {
        let date = eligible_date(date, today)?;
        self.migrate(&self.naming.day_prefix(date)).await
    }

    /// Copy every private object under `prefix` into the public container.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self, prefix: &str) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(prefix);
        match self.copy_all(prefix, &mut report).await {
            Ok(()) => {
                report.advance(MigrationState::Done);
                Ok(report)
            }
            Err(err) => {
                report.advance(MigrationState::Failed);
                self.metrics.runs_failed.add(1, &[]);
                error!(
                    prefix,
                    copied = report.copied,
                    error = %err,
                    "unembargo stopped, rerun to copy the remaining objects"
                );
                Err(err)
            }
        }
    }

    async fn copy_all(&self, prefix: &str, report: &mut MigrationReport) -> Result<()> {
        report.advance(MigrationState::ListingDest);
        let existing: HashSet<String> = self
            .store
            .list_all(&self.public_container, prefix)
            .await?
            .into_iter()
            .collect();

        report.advance(MigrationState::ListingSource);
        let keys = self.store.list_all(&self.private_container, prefix).await?;

        report.advance(MigrationState::Copying);
        for key in keys {
            if existing.contains(&key) {
                self.store.delete(&self.public_container, &key).await?;
                self.metrics.object("delete_stale");
                report.replaced += 1;
            }
            let content = self.store.get(&self.private_container, &key).await?;
            let put = self
                .store
                .put(&self.public_container, &key, content)
                .await?;
            self.metrics.object("copy");
            report.copied += 1;
            info!(key = %key, size_bytes = put.size_bytes, "released object");
        }
        Ok(())
    }
}

/// Dates before [`EPOCH_YEAR`] or not yet a full year old are refused.
pub fn eligible_date(date: u32, today: NaiveDate) -> Result<RecordDate> {
    let invalid = |reason: &str| EmbargoError::InvalidDate(format!("{date}: {reason}"));
    let record_date =
        RecordDate::from_yyyymmdd(date).ok_or_else(|| invalid("not a calendar date"))?;
    if record_date.year() < EPOCH_YEAR {
        return Err(invalid("before the first year of data"));
    }
    if !CutoffDate::one_year_before(today).precedes(record_date) {
        return Err(invalid("still under embargo"));
    }
    Ok(record_date)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::testing::memory_store;

    const PREFIX: &str = "sidestream/2017/05/16";
    const FIRST: &str = "sidestream/2017/05/16/20170516T000000Z-mlab1-atl06-sidestream-0000-e.tgz";
    const SECOND: &str = "sidestream/2017/05/16/20170516T000000Z-mlab1-atl06-sidestream-0001-e.tgz";

    async fn seed(store: &Arc<dyn BlobStore>) {
        store
            .put_bytes("private", FIRST, Bytes::from_static(b"first"))
            .await
            .unwrap();
        store
            .put_bytes("private", SECOND, Bytes::from_static(b"second"))
            .await
            .unwrap();
        store
            .put_bytes(
                "private",
                "sidestream/2017/05/17/20170517T000000Z-mlab1-atl06-sidestream-0000-e.tgz",
                Bytes::from_static(b"next day"),
            )
            .await
            .unwrap();
    }

    fn migrator(store: Arc<dyn BlobStore>) -> UnembargoMigrator {
        UnembargoMigrator::new(store, "private", "public", ArchiveNaming::default())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_migrate_copies_and_keeps_private() {
        let store = memory_store();
        seed(&store).await;

        let report = migrator(store.clone()).migrate(PREFIX).await.unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(report.replaced, 0);
        assert_eq!(report.state, MigrationState::Done);

        let public = store.list_all("public", "").await.unwrap();
        assert_eq!(public, vec![FIRST.to_string(), SECOND.to_string()]);
        assert_eq!(store.list_all("private", "").await.unwrap().len(), 3);
        assert_eq!(
            store.read_bytes("public", FIRST, 1024).await.unwrap(),
            Bytes::from_static(b"first")
        );
    }

    #[tokio::test]
    async fn test_migrate_twice_is_stable() {
        let store = memory_store();
        seed(&store).await;
        let migrator = migrator(store.clone());

        migrator.migrate(PREFIX).await.unwrap();
        let before = store.list_all("public", "").await.unwrap();
        let second = migrator.migrate(PREFIX).await.unwrap();
        assert_eq!(second.replaced, 2);
        assert_eq!(store.list_all("public", "").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_stale_public_copy_is_overwritten() {
        let store = memory_store();
        seed(&store).await;
        store
            .put_bytes("public", FIRST, Bytes::from_static(b"stale"))
            .await
            .unwrap();

        let report = migrator(store.clone()).migrate(PREFIX).await.unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(
            store.read_bytes("public", FIRST, 1024).await.unwrap(),
            Bytes::from_static(b"first")
        );
    }

    #[tokio::test]
    async fn test_unembargo_day() {
        let store = memory_store();
        seed(&store).await;

        let report = migrator(store.clone())
            .unembargo_day(20170516, today())
            .await
            .unwrap();
        assert_eq!(report.prefix, PREFIX);
        assert_eq!(report.copied, 2);
    }

    #[tokio::test]
    async fn test_unembargo_day_rejects_bad_dates_before_listing() {
        let store = memory_store();
        seed(&store).await;
        let migrator = migrator(store.clone());

        for date in [20180101, 20170601, 20170230, 20080101, 2017051] {
            let err = migrator.unembargo_day(date, today()).await.unwrap_err();
            assert!(matches!(err, EmbargoError::InvalidDate(_)), "{date}");
        }
        assert!(store.list_all("public", "").await.unwrap().is_empty());
    }

    #[test]
    fn test_eligible_date_boundary() {
        assert!(eligible_date(20170531, today()).is_ok());
        assert!(eligible_date(20170601, today()).is_err());
        assert!(eligible_date(20090101, today()).is_ok());
    }
}
