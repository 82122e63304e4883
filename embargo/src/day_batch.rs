use std::{fmt, sync::Arc};

use blob_store::{BlobError, BlobStore};
use bytes::Bytes;
use data_model::{
    day_of_week,
    ArchiveNaming,
    Classification,
    CutoffDate,
    DecisionReason,
    EmbargoBuckets,
    RecordDate,
    UNKNOWN_DAY,
};
use futures::{stream, StreamExt};
use metrics::embargo_stats;
use tracing::{error, info, warn};

use crate::{
    error::{EmbargoError, Result, SplitError},
    policy::EmbargoPolicy,
    splitter::{split_async, SplitStats},
    whitelist::SiteWhitelist,
};

/// 1 GiB
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub buckets: EmbargoBuckets,
    pub naming: ArchiveNaming,
    pub max_archive_bytes: u64,
    /// Archives processed at the same time within one run.
    pub archive_concurrency: usize,
}

impl BatchSettings {
    pub fn new(buckets: EmbargoBuckets) -> Self {
        Self {
            buckets,
            naming: ArchiveNaming::default(),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            archive_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedArchive {
    pub key: String,
    pub error: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default)]
pub struct DayReport {
    pub prefix: String,
    /// Archives split and uploaded, in completion order.
    pub processed: Vec<String>,
    /// Archives that could not be split. Nothing was uploaded for them.
    pub failed: Vec<FailedArchive>,
    pub stats: SplitStats,
}

impl DayReport {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for DayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} archives embargoed ({} public, {} embargoed members), {} failed",
            self.prefix,
            self.processed.len(),
            self.stats.public,
            self.stats.private,
            self.failed.len()
        )?;
        for failed in &self.failed {
            write!(f, "\n{}: {}", failed.key, failed.error)?;
        }
        Ok(())
    }
}

/// Splits every archive of a day from the source container into the public
/// and private containers.
#[derive(Clone)]
pub struct DayBatchRunner {
    store: Arc<dyn BlobStore>,
    whitelist: Arc<SiteWhitelist>,
    settings: BatchSettings,
    metrics: Arc<embargo_stats::Metrics>,
}

impl DayBatchRunner {
    pub fn new(
        store: Arc<dyn BlobStore>,
        whitelist: Arc<SiteWhitelist>,
        settings: BatchSettings,
    ) -> Self {
        let metrics = Arc::new(embargo_stats::Metrics::new(&settings.naming.record_type));
        Self {
            store,
            whitelist,
            settings,
            metrics,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<embargo_stats::Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Same runner writing to other containers.
    pub fn with_buckets(&self, buckets: EmbargoBuckets) -> Self {
        let mut runner = self.clone();
        runner.settings.buckets = buckets;
        runner
    }

    pub fn buckets(&self) -> &EmbargoBuckets {
        &self.settings.buckets
    }

    pub fn naming(&self) -> &ArchiveNaming {
        &self.settings.naming
    }

    #[tracing::instrument(skip_all, fields(date = %date, cutoff = %cutoff))]
    pub async fn run_day(&self, date: RecordDate, cutoff: CutoffDate) -> Result<DayReport> {
        let policy = self.policy(cutoff)?;
        let prefix = self.settings.naming.day_prefix(date);
        let keys = self
            .store
            .list_all(&self.settings.buckets.source, &prefix)
            .await?;
        let candidates: Vec<String> = keys
            .into_iter()
            .filter(|key| self.settings.naming.is_candidate(key))
            .collect();
        info!(prefix = %prefix, archives = candidates.len(), "embargoing day");

        let mut report = DayReport::new(&prefix);
        let mut outcomes = stream::iter(candidates)
            .map(|key| {
                let policy = policy.clone();
                async move {
                    let outcome = self.process_archive(&key, policy).await;
                    (key, outcome)
                }
            })
            .buffer_unordered(self.settings.archive_concurrency.max(1));

        while let Some((key, outcome)) = outcomes.next().await {
            match outcome {
                Ok(stats) => {
                    report.stats.merge(&stats);
                    report.processed.push(key);
                }
                Err(EmbargoError::Split { source, .. }) => {
                    report.failed.push(FailedArchive {
                        key,
                        error: source.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            prefix = %prefix,
            processed = report.processed.len(),
            failed = report.failed.len(),
            "finished embargoing day"
        );
        Ok(report)
    }

    /// Embargo a single archive of the source container.
    #[tracing::instrument(skip_all, fields(key = %key, cutoff = %cutoff))]
    pub async fn run_file(&self, key: &str, cutoff: CutoffDate) -> Result<DayReport> {
        if !self.settings.naming.is_candidate(key) {
            return Err(EmbargoError::NotAnArchive(key.to_string()));
        }
        let policy = self.policy(cutoff)?;
        let stats = self.process_archive(key, policy).await?;

        let mut report = DayReport::new(key);
        report.stats = stats;
        report.processed.push(key.to_string());
        Ok(report)
    }

    fn policy(&self, cutoff: CutoffDate) -> Result<EmbargoPolicy> {
        let snapshot = self
            .whitelist
            .snapshot()
            .ok_or(EmbargoError::WhitelistNotLoaded)?;
        Ok(EmbargoPolicy::new(snapshot, cutoff))
    }

    async fn process_archive(&self, key: &str, policy: EmbargoPolicy) -> Result<SplitStats> {
        let day = match day_of_week(key) {
            Some(day) => day,
            None => {
                warn!(key, label = UNKNOWN_DAY, "archive key has no parseable date");
                UNKNOWN_DAY
            }
        };
        match self.embargo_archive(key, policy).await {
            Ok(stats) => {
                self.metrics.archive_succeeded(day);
                self.record_stats(key, &stats);
                Ok(stats)
            }
            Err(err) => {
                self.metrics.archive_failed(day);
                error!(key, error = %err, "failed to embargo archive");
                Err(err)
            }
        }
    }

    async fn embargo_archive(&self, key: &str, policy: EmbargoPolicy) -> Result<SplitStats> {
        let buckets = &self.settings.buckets;
        let limit = self.settings.max_archive_bytes;
        let split_failed = |source| EmbargoError::Split {
            key: key.to_string(),
            source,
        };

        let content = match self.store.read_bytes(&buckets.source, key, limit).await {
            Ok(content) => content,
            Err(BlobError::TooLarge { limit, .. }) => {
                return Err(split_failed(SplitError::TooLarge { limit }))
            }
            Err(err) => return Err(err.into()),
        };
        let output = split_async(content, policy, limit)
            .await
            .map_err(split_failed)?;

        self.store
            .put_bytes(&buckets.public, key, Bytes::from(output.public))
            .await?;
        self.store
            .put_bytes(
                &buckets.private,
                &self.settings.naming.private_key(key),
                Bytes::from(output.private),
            )
            .await?;
        Ok(output.stats)
    }

    fn record_stats(&self, key: &str, stats: &SplitStats) {
        self.metrics
            .members_classified(Classification::Public, stats.public);
        self.metrics
            .members_classified(Classification::Embargoed, stats.private);
        for (reason, count) in &stats.reasons {
            self.metrics.decisions_made(*reason, *count);
        }
        self.metrics
            .ip_error("invalid", stats.reason_count(DecisionReason::InvalidIp));

        let malformed: u64 = stats
            .reasons
            .iter()
            .filter(|(reason, _)| reason.is_malformed_input())
            .map(|(_, count)| count)
            .sum();
        if malformed > 0 {
            warn!(key, malformed, "archive holds records with malformed names");
        }
    }
}
