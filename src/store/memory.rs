use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{Bottleneck, BucketPeriod, FlakyTestRecord, PipelineRun, TrendBucket};

use super::{AnalysisOutcome, RunStore};

/// Everything the store holds, keyed for idempotent replace. Serializable
/// so the JSON store can snapshot it wholesale.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct Inner {
    /// repo -> run id -> run
    runs: HashMap<String, HashMap<String, PipelineRun>>,
    /// repo -> test id -> record
    records: HashMap<String, HashMap<String, FlakyTestRecord>>,
    /// repo -> latest ranked bottleneck set
    bottlenecks: HashMap<String, Vec<Bottleneck>>,
    /// repo -> buckets, keyed within by (period, start)
    buckets: HashMap<String, Vec<TrendBucket>>,
}

impl Inner {
    fn upsert_bucket(&mut self, bucket: TrendBucket, respect_closed: bool) {
        let buckets = self.buckets.entry(bucket.repo.clone()).or_default();
        match buckets
            .iter_mut()
            .find(|b| b.period == bucket.period && b.starts_at == bucket.starts_at)
        {
            Some(existing) => {
                if respect_closed && existing.closed {
                    if *existing != bucket {
                        warn!(
                            "Refusing to overwrite closed {:?} bucket {} for {}",
                            bucket.period, bucket.starts_at, bucket.repo
                        );
                    }
                } else {
                    *existing = bucket;
                }
            }
            None => buckets.push(bucket),
        }
    }
}

/// In-memory run store.
///
/// The default backing store; also what tests run against. A single write
/// lock section per commit gives the all-or-nothing guarantee.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the full store state; the JSON store persists this.
    pub(super) async fn snapshot(&self) -> Result<String> {
        let inner = self.inner.read().await;
        Ok(serde_json::to_string_pretty(&*inner)?)
    }

    pub(super) fn from_snapshot(snapshot: &str) -> Result<Self> {
        let inner: Inner = serde_json::from_str(snapshot)?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn recent_runs(&self, repo: &str, limit: usize) -> Result<Vec<PipelineRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<PipelineRun> = inner
            .runs
            .get(repo)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        // Chronological; run id breaks start-time ties deterministically
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        if runs.len() > limit {
            runs.drain(..runs.len() - limit);
        }
        Ok(runs)
    }

    async fn upsert_run(&self, run: PipelineRun) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .runs
            .entry(run.repo.clone())
            .or_default()
            .insert(run.run_id.clone(), run);
        Ok(())
    }

    async fn repos(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut repos: Vec<String> = inner.runs.keys().cloned().collect();
        repos.sort();
        Ok(repos)
    }

    async fn flaky_record(&self, repo: &str, test_id: &str) -> Result<Option<FlakyTestRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .get(repo)
            .and_then(|by_test| by_test.get(test_id))
            .cloned())
    }

    async fn flaky_records(&self, repo: &str) -> Result<Vec<FlakyTestRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<FlakyTestRecord> = inner
            .records
            .get(repo)
            .map(|by_test| by_test.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        Ok(records)
    }

    async fn put_flaky_record(&self, record: FlakyTestRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .records
            .entry(record.repo.clone())
            .or_default()
            .insert(record.test_id.clone(), record);
        Ok(())
    }

    async fn bottlenecks(&self, repo: &str) -> Result<Vec<Bottleneck>> {
        let inner = self.inner.read().await;
        Ok(inner.bottlenecks.get(repo).cloned().unwrap_or_default())
    }

    async fn buckets(
        &self,
        repo: &str,
        period: BucketPeriod,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TrendBucket>> {
        let inner = self.inner.read().await;
        let mut buckets: Vec<TrendBucket> = inner
            .buckets
            .get(repo)
            .map(|all| {
                all.iter()
                    .filter(|b| b.period == period && b.starts_at >= from && b.starts_at < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        buckets.sort_by_key(|b| b.starts_at);
        Ok(buckets)
    }

    async fn open_bucket(&self, repo: &str, period: BucketPeriod) -> Result<Option<TrendBucket>> {
        let inner = self.inner.read().await;
        Ok(inner.buckets.get(repo).and_then(|all| {
            all.iter()
                .filter(|b| b.period == period && !b.closed)
                .max_by_key(|b| b.starts_at)
                .cloned()
        }))
    }

    async fn put_bucket(&self, bucket: TrendBucket) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.upsert_bucket(bucket, false);
        Ok(())
    }

    async fn commit_analysis(&self, repo: &str, outcome: AnalysisOutcome) -> Result<()> {
        // One write lock section: readers see the old pass or the new one,
        // never a mixture
        let mut inner = self.inner.write().await;
        for record in outcome.records {
            inner
                .records
                .entry(record.repo.clone())
                .or_default()
                .insert(record.test_id.clone(), record);
        }
        inner.bottlenecks.insert(repo.to_string(), outcome.bottlenecks);
        for bucket in outcome.buckets {
            inner.upsert_bucket(bucket, true);
        }
        Ok(())
    }
}
