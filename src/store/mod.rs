mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Bottleneck, BucketPeriod, FlakyTestRecord, PipelineRun, TrendBucket};

/// Everything one analysis pass produced for one repository.
///
/// Committed wholesale: a pass either lands all of it or none of it, so no
/// reader ever observes half-updated analysis state.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub records: Vec<FlakyTestRecord>,
    pub bottlenecks: Vec<Bottleneck>,
    pub buckets: Vec<TrendBucket>,
}

/// Persistence contract for pipeline records and derived analysis output.
///
/// All writes are keyed by natural identity (repo + run id, repo + test id,
/// repo + bucket period + start), giving idempotent replace semantics:
/// re-writing the same entity supersedes it, never duplicates it.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// The most recent `limit` runs for a repository, in chronological
    /// order of start time.
    async fn recent_runs(&self, repo: &str, limit: usize) -> Result<Vec<PipelineRun>>;

    async fn upsert_run(&self, run: PipelineRun) -> Result<()>;

    /// Repositories with at least one stored run.
    async fn repos(&self) -> Result<Vec<String>>;

    async fn flaky_record(&self, repo: &str, test_id: &str) -> Result<Option<FlakyTestRecord>>;

    async fn flaky_records(&self, repo: &str) -> Result<Vec<FlakyTestRecord>>;

    async fn put_flaky_record(&self, record: FlakyTestRecord) -> Result<()>;

    /// Latest bottleneck set for a repository, as ranked by the analyzer.
    async fn bottlenecks(&self, repo: &str) -> Result<Vec<Bottleneck>>;

    /// Buckets whose start falls within `[from, to)`, ordered by start.
    async fn buckets(
        &self,
        repo: &str,
        period: BucketPeriod,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TrendBucket>>;

    async fn open_bucket(&self, repo: &str, period: BucketPeriod) -> Result<Option<TrendBucket>>;

    /// Unconditional bucket replace; the backfill path for closed buckets.
    async fn put_bucket(&self, bucket: TrendBucket) -> Result<()>;

    /// Atomically lands a pass's verdicts, bottlenecks, and open bucket for
    /// one repository. Closed buckets are never touched through this path.
    async fn commit_analysis(&self, repo: &str, outcome: AnalysisOutcome) -> Result<()>;
}
