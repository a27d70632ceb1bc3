use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::time::timeout;

use crate::analysis::{bottleneck, flaky, trend};
use crate::config::Config;
use crate::error::{CiscopeError, Result};
use crate::model::{
    BucketPeriod, Classification, FlakyTestRecord, OutcomeSample, PipelineRun, TrendBucket,
};
use crate::store::{AnalysisOutcome, RunStore};

/// Per-repository single-flight gate.
///
/// `running` means a pass is in flight; `pending` coalesces every trigger
/// that arrives meanwhile into exactly one follow-up pass.
#[derive(Debug, Default)]
struct Gate {
    running: bool,
    pending: bool,
}

/// Schedules and executes analysis passes, one repository at a time.
///
/// Independent repositories run fully in parallel; within a repository at
/// most one pass is in flight and bursty triggers coalesce rather than
/// queue. Passes are idempotent, so a redundant invocation caused by
/// coalescing or retries is harmless.
pub struct Orchestrator<S> {
    store: Arc<S>,
    config: Arc<Config>,
    gates: Arc<Mutex<HashMap<String, Gate>>>,
    shutdown: Arc<AtomicBool>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            gates: Arc::clone(&self.gates),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S: RunStore + 'static> Orchestrator<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            gates: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cancellation of in-flight passes at their next safe point
    /// (between fetch and compute; committed state is never left partial).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Triggers analysis for a repository after new data arrived.
    ///
    /// Returns `true` when a pass was scheduled, `false` when it was
    /// coalesced into one already in flight.
    pub fn on_new_data(&self, repo: &str) -> bool {
        {
            let mut gates = self
                .gates
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let gate = gates.entry(repo.to_string()).or_default();
            if gate.running {
                gate.pending = true;
                debug!("Coalescing analysis trigger for {repo}");
                return false;
            }
            gate.running = true;
        }

        let this = self.clone();
        let repo = repo.to_string();
        tokio::spawn(async move {
            this.drive(&repo).await;
        });
        true
    }

    /// Waits until no repository has a pass in flight or pending.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self
                .gates
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .is_empty();
            if idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Runs passes for `repo` until no trigger is pending, then releases
    /// and removes the gate. Errors are isolated to this repository.
    ///
    /// An unreachable store gets a short backoff-and-retry; a timeout does
    /// not, the pass waits for the next trigger instead.
    async fn drive(&self, repo: &str) {
        loop {
            let mut backoff = Duration::from_millis(200);
            for attempt in 0..3 {
                match self.run_once(repo).await {
                    Ok(()) => break,
                    Err(err @ CiscopeError::StoreUnavailable(_)) if attempt < 2 => {
                        warn!("Analysis pass for {repo} will retry: {err}");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    Err(err) => {
                        error!("Analysis pass for {repo} failed: {err}");
                        break;
                    }
                }
            }

            let again = {
                let mut gates = self
                    .gates
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match gates.get_mut(repo) {
                    Some(gate) if gate.pending => {
                        gate.pending = false;
                        true
                    }
                    _ => {
                        // Lazy cleanup: idle repositories hold no gate
                        gates.remove(repo);
                        false
                    }
                }
            };
            if !again {
                break;
            }
        }
    }

    /// Runs one bounded-window analysis pass for `repo`, with the
    /// configured timeout applied over fetch and compute together.
    pub async fn run_once(&self, repo: &str) -> Result<()> {
        let secs = self.config.orchestrator.pass_timeout_secs;
        timeout(Duration::from_secs(secs), self.pass(repo))
            .await
            .map_err(|_| CiscopeError::AnalysisTimeout {
                repo: repo.to_string(),
                secs,
            })?
    }

    async fn pass(&self, repo: &str) -> Result<()> {
        // Fetch phase
        let runs = self
            .store
            .recent_runs(repo, self.config.analysis.window_size)
            .await?;
        let existing = self.store.flaky_records(repo).await?;
        let prior_open = self
            .store
            .open_bucket(repo, self.config.trend.period)
            .await?;

        // Safe cancellation point: nothing has been written yet
        if self.shutdown.load(Ordering::SeqCst) {
            info!("Analysis pass for {repo} cancelled before compute");
            return Ok(());
        }

        // Pure compute phase, then a single all-or-nothing commit
        let outcome = compute_pass(&self.config, repo, &runs, existing, prior_open, Utc::now());
        self.store.commit_analysis(repo, outcome).await?;
        debug!("Analysis pass for {repo} committed");
        Ok(())
    }

    /// Recomputes one closed bucket from the stored window. The explicit
    /// (and logged) exception to closed-bucket immutability.
    pub async fn backfill(
        &self,
        repo: &str,
        period: BucketPeriod,
        starts_at: DateTime<Utc>,
    ) -> Result<TrendBucket> {
        let runs = self
            .store
            .recent_runs(repo, self.config.analysis.window_size)
            .await?;
        let records = self.store.flaky_records(repo).await?;

        let ends_at = trend::bucket_end(period, starts_at);
        let in_bucket: Vec<&PipelineRun> = runs
            .iter()
            .filter(|r| r.started_at >= starts_at && r.started_at < ends_at)
            .collect();
        let classifications: Vec<Classification> =
            records.iter().map(|r| r.classification).collect();

        let bucket = trend::backfill(repo, period, starts_at, &in_bucket, &classifications);
        self.store.put_bucket(bucket.clone()).await?;
        Ok(bucket)
    }
}

/// One repository's full analysis pass over its window. Pure: no I/O, no
/// suspension points, deterministic for a given input and `now` period.
fn compute_pass(
    config: &Config,
    repo: &str,
    runs: &[PipelineRun],
    existing: Vec<FlakyTestRecord>,
    prior_open: Option<TrendBucket>,
    now: DateTime<Utc>,
) -> AnalysisOutcome {
    let mut ordered: Vec<&PipelineRun> = runs.iter().collect();
    ordered.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });

    // Per-test sample windows, chronological. The window is rebuilt from
    // the stored runs each pass, so re-ingested runs replace instead of
    // double-counting, and the pass stays idempotent.
    let mut windows: std::collections::BTreeMap<String, Vec<OutcomeSample>> =
        std::collections::BTreeMap::new();
    for run in &ordered {
        for test in &run.tests {
            let samples = windows.entry(test.test_id.clone()).or_default();
            let sample = OutcomeSample {
                run_id: run.run_id.clone(),
                commit: run.commit.clone(),
                branch: run.branch.clone(),
                ran_at: run.started_at,
                status: test.status,
            };
            // A retry within one run supersedes the earlier outcome
            match samples.last_mut() {
                Some(last) if last.run_id == run.run_id => *last = sample,
                _ => samples.push(sample),
            }
        }
    }

    let mut frozen: HashMap<String, FlakyTestRecord> = existing
        .into_iter()
        .map(|r| (r.test_id.clone(), r))
        .collect();

    let mut records = Vec::with_capacity(windows.len());
    for (test_id, samples) in windows {
        let mut record = frozen
            .remove(&test_id)
            .unwrap_or_else(|| FlakyTestRecord::new(repo, &test_id));
        let verdict = flaky::evaluate(&config.analysis, &samples);
        flaky::advance(&mut record, samples, &verdict, &config.analysis, now);
        records.push(record);
    }

    // Tests absent from this window keep their frozen classification but
    // still count toward the trend rollup
    let classifications: Vec<Classification> = records
        .iter()
        .map(|r| r.classification)
        .chain(frozen.values().map(|r| r.classification))
        .collect();

    let bottlenecks = bottleneck::analyze(&config.bottleneck, repo, runs);

    let period = config.trend.period;
    let starts_at = trend::bucket_start(period, now);
    let ends_at = trend::bucket_end(period, starts_at);
    let in_bucket: Vec<&PipelineRun> = ordered
        .iter()
        .filter(|r| r.started_at >= starts_at && r.started_at < ends_at)
        .copied()
        .collect();
    let bucket = trend::rollup(repo, period, starts_at, &in_bucket, &classifications, false);

    // A period rollover seals whatever bucket the previous pass left open;
    // its tallies are final, only the lifecycle flag changes
    let mut buckets = Vec::with_capacity(2);
    if let Some(mut prior) = prior_open {
        if prior.starts_at != starts_at {
            prior.closed = true;
            buckets.push(prior);
        }
    }
    buckets.push(bucket);

    AnalysisOutcome {
        records,
        bottlenecks,
        buckets,
    }
}
