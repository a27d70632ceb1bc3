use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One pipeline execution as reported by a CI provider.
///
/// Identity is `(repo, run_id)`; re-ingesting a run replaces the stored
/// copy. Cross-repository comparison of absolute durations is meaningless,
/// so every analysis is scoped to a single repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub repo: String,
    pub run_id: String,
    pub branch: String,
    /// Full commit hash the run executed against
    pub commit: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is in flight or was never reported finished
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub tests: Vec<TestOutcome>,
}

impl PipelineRun {
    /// Wall-clock duration in seconds, when the run has finished.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Terminal status of a run or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    /// Infrastructure or provider error, not a verdict on the code
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }
}

/// One named step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Declared upstream step names. `Some(vec![])` is an explicit "no
    /// dependencies"; `None` means the provider reported nothing, which is
    /// weaker than independence.
    pub depends_on: Option<Vec<String>>,
    /// Failure signature when the step failed
    pub error_detail: Option<FailureSignature>,
}

impl Step {
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Whether the two steps' wall-clock intervals intersect.
    ///
    /// `None` when either step never finished; an unfinished step cannot
    /// witness overlap either way.
    pub fn overlaps(&self, other: &Step) -> Option<bool> {
        let self_end = self.finished_at?;
        let other_end = other.finished_at?;
        Some(self.started_at < other_end && other.started_at < self_end)
    }
}

/// One test's result within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Stable test identifier, e.g. `suite::case`
    pub test_id: String,
    pub status: TestStatus,
    pub duration_secs: f64,
    pub failure: Option<FailureSignature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

/// Normalized description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignature {
    pub category: FailureCategory,
    /// First line of the failure output, truncated by the provider
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Infra,
    Test,
    Build,
    Deploy,
    Flaky,
}

/// One test outcome as folded into a rolling analysis window.
///
/// A projection of `TestOutcome` joined with its run's identity; ordered
/// chronologically by `ran_at` within a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub run_id: String,
    pub commit: String,
    pub branch: String,
    pub ran_at: DateTime<Utc>,
    pub status: TestStatus,
}

/// Flakiness classification of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Too few counted samples to say anything
    InsufficientData,
    Stable,
    /// Score over the suspect threshold, flakiness not yet confirmed
    Suspect,
    Flaky,
    /// Failing consistently; broken, not flaky
    PersistentFailure,
    /// Manually excluded from scoring until lifted
    Quarantined,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::InsufficientData => "INSUFFICIENT DATA",
            Classification::Stable => "STABLE",
            Classification::Suspect => "SUSPECT",
            Classification::Flaky => "FLAKY",
            Classification::PersistentFailure => "PERSISTENT FAILURE",
            Classification::Quarantined => "QUARANTINED",
        };
        write!(f, "{label}")
    }
}

/// One recorded classification transition, audit-trail style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationChange {
    pub at: DateTime<Utc>,
    pub from: Classification,
    pub to: Classification,
    pub reason: String,
}

/// Everything known about one test's flakiness in one repository.
///
/// Identity is `(repo, test_id)`. `samples` is the exact window the record
/// last folded in, which makes re-applying an unchanged window a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTestRecord {
    pub repo: String,
    pub test_id: String,
    /// Rolling outcome window, oldest first
    pub samples: Vec<OutcomeSample>,
    /// Current flakiness score, 0-100
    pub score: f64,
    pub classification: Classification,
    /// Consecutive analysis windows at or above the flaky threshold
    pub flaky_streak: u32,
    /// Trailing consecutive passing runs
    pub clean_streak: u32,
    pub history: Vec<ClassificationChange>,
}

impl FlakyTestRecord {
    pub fn new(repo: &str, test_id: &str) -> Self {
        Self {
            repo: repo.to_string(),
            test_id: test_id.to_string(),
            samples: vec![],
            score: 0.0,
            classification: Classification::InsufficientData,
            flaky_streak: 0,
            clean_streak: 0,
            history: vec![],
        }
    }
}

/// A detected pipeline bottleneck, ranked by estimated time saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub repo: String,
    pub step_name: String,
    pub kind: BottleneckKind,
    pub median_secs: f64,
    pub p90_secs: f64,
    /// The step's own median within this repository's window
    pub baseline_median_secs: f64,
    /// Observations backing the statistics
    pub occurrences: usize,
    /// Estimated total seconds recoverable over the window
    pub time_saved_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum BottleneckKind {
    /// p90 far above the step's own baseline median
    Slow,
    /// Ran strictly after an independent step in every observed run
    Serialization { peer: String },
}

/// Rollup bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BucketPeriod {
    Daily,
    Weekly,
}

/// Aggregated health statistics for one repository over one bucket.
///
/// Identity is `(repo, period, starts_at)`. Rates are `None` rather than a
/// fabricated zero when the bucket holds no qualifying runs. A closed
/// bucket is immutable except through explicit backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub repo: String,
    pub period: BucketPeriod,
    pub starts_at: DateTime<Utc>,
    pub total_runs: usize,
    pub successful_runs: usize,
    /// Percentage, 0-100
    pub success_rate: Option<f64>,
    pub avg_duration_secs: Option<f64>,
    /// Tests currently classified FLAKY or SUSPECT
    pub flaky_test_count: usize,
    pub closed: bool,
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 11, hour, minute, 0).unwrap()
    }

    fn step(name: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Step {
        Step {
            name: name.to_string(),
            status: RunStatus::Success,
            started_at: start,
            finished_at: end,
            depends_on: None,
            error_detail: None,
        }
    }

    #[test]
    fn run_duration_requires_a_finish_time() {
        let run = PipelineRun {
            repo: "g/p".to_string(),
            run_id: "1".to_string(),
            branch: "main".to_string(),
            commit: "abc".to_string(),
            status: RunStatus::Success,
            started_at: at(9, 0),
            finished_at: Some(at(9, 5)),
            steps: vec![],
            tests: vec![],
        };
        assert_eq!(run.duration_secs(), Some(300.0));

        let mut unfinished = run;
        unfinished.finished_at = None;
        assert_eq!(unfinished.duration_secs(), None);
    }

    #[test]
    fn overlap_detects_intersecting_intervals() {
        let a = step("a", at(9, 0), Some(at(9, 10)));
        let b = step("b", at(9, 5), Some(at(9, 15)));
        assert_eq!(a.overlaps(&b), Some(true));
        assert_eq!(b.overlaps(&a), Some(true));
    }

    #[test]
    fn back_to_back_steps_do_not_overlap() {
        let a = step("a", at(9, 0), Some(at(9, 10)));
        let b = step("b", at(9, 10), Some(at(9, 20)));
        assert_eq!(a.overlaps(&b), Some(false));
    }

    #[test]
    fn overlap_is_unknown_for_unfinished_steps() {
        let a = step("a", at(9, 0), Some(at(9, 10)));
        let b = step("b", at(9, 5), None);
        assert_eq!(a.overlaps(&b), None);
    }

    #[test]
    fn run_status_round_trips_through_lowercase() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let status: RunStatus = serde_json::from_str("\"success\"").unwrap();
        assert!(status.is_success());
    }

    #[test]
    fn new_record_starts_without_data() {
        let record = FlakyTestRecord::new("g/p", "suite::case");
        assert_eq!(record.classification, Classification::InsufficientData);
        assert_eq!(record.score, 0.0);
        assert!(record.samples.is_empty());
        assert!(record.history.is_empty());
    }

    #[test]
    fn bottleneck_kind_serializes_with_tag() {
        let kind = BottleneckKind::Serialization {
            peer: "unit".to_string(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "serialization");
        assert_eq!(json["peer"], "unit");
    }
}
