use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::error::{CiscopeError, Result};
use crate::model::{Bottleneck, BucketPeriod, FlakyTestRecord, PipelineRun, TrendBucket};

use super::memory::MemoryStore;
use super::{AnalysisOutcome, RunStore};

/// File-backed run store.
///
/// A full snapshot of the store lives in a single JSON file, loaded into
/// memory at open and rewritten wholesale after every mutation. Default
/// location follows the platform cache directory:
/// - Linux: `~/.cache/ciscope/store.json`
/// - macOS: `~/Library/Caches/ciscope/store.json`
pub struct JsonStore {
    path: PathBuf,
    mem: MemoryStore,
}

impl JsonStore {
    /// Opens the store at `path`, or at the default cache location.
    ///
    /// A corrupt or unreadable snapshot is not fatal: the store starts
    /// empty and logs a warning, matching how stale caches are treated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be determined or
    /// created.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => dirs::cache_dir()
                .ok_or_else(|| CiscopeError::StoreUnavailable("no cache directory found".into()))?
                .join("ciscope")
                .join("store.json"),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mem = if path.exists() {
            match fs::read_to_string(&path)
                .ok()
                .and_then(|contents| MemoryStore::from_snapshot(&contents).ok())
            {
                Some(mem) => {
                    debug!("Loaded store snapshot from: {}", path.display());
                    mem
                }
                None => {
                    warn!("Failed to load store snapshot, starting empty");
                    MemoryStore::new()
                }
            }
        } else {
            MemoryStore::new()
        };

        info!("Run store at: {}", path.display());

        Ok(Self { path, mem })
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.mem.snapshot().await?;
        fs::write(&self.path, snapshot)?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonStore {
    async fn recent_runs(&self, repo: &str, limit: usize) -> Result<Vec<PipelineRun>> {
        self.mem.recent_runs(repo, limit).await
    }

    async fn upsert_run(&self, run: PipelineRun) -> Result<()> {
        self.mem.upsert_run(run).await?;
        self.persist().await
    }

    async fn repos(&self) -> Result<Vec<String>> {
        self.mem.repos().await
    }

    async fn flaky_record(&self, repo: &str, test_id: &str) -> Result<Option<FlakyTestRecord>> {
        self.mem.flaky_record(repo, test_id).await
    }

    async fn flaky_records(&self, repo: &str) -> Result<Vec<FlakyTestRecord>> {
        self.mem.flaky_records(repo).await
    }

    async fn put_flaky_record(&self, record: FlakyTestRecord) -> Result<()> {
        self.mem.put_flaky_record(record).await?;
        self.persist().await
    }

    async fn bottlenecks(&self, repo: &str) -> Result<Vec<Bottleneck>> {
        self.mem.bottlenecks(repo).await
    }

    async fn buckets(
        &self,
        repo: &str,
        period: BucketPeriod,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TrendBucket>> {
        self.mem.buckets(repo, period, from, to).await
    }

    async fn open_bucket(&self, repo: &str, period: BucketPeriod) -> Result<Option<TrendBucket>> {
        self.mem.open_bucket(repo, period).await
    }

    async fn put_bucket(&self, bucket: TrendBucket) -> Result<()> {
        self.mem.put_bucket(bucket).await?;
        self.persist().await
    }

    async fn commit_analysis(&self, repo: &str, outcome: AnalysisOutcome) -> Result<()> {
        self.mem.commit_analysis(repo, outcome).await?;
        self.persist().await
    }
}
