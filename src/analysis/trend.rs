use chrono::{DateTime, Datelike, Duration, Utc};
use log::warn;

use crate::model::{BucketPeriod, Classification, PipelineRun, TrendBucket};

/// Start of the bucket containing `at`.
///
/// Daily buckets start at midnight UTC; weekly buckets start Monday
/// midnight UTC.
pub fn bucket_start(period: BucketPeriod, at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    match period {
        BucketPeriod::Daily => midnight,
        BucketPeriod::Weekly => {
            midnight - Duration::days(i64::from(at.weekday().num_days_from_monday()))
        }
    }
}

/// End (exclusive) of the bucket starting at `starts_at`.
pub fn bucket_end(period: BucketPeriod, starts_at: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        BucketPeriod::Daily => starts_at + Duration::days(1),
        BucketPeriod::Weekly => starts_at + Duration::days(7),
    }
}

/// Folds one bucket's runs into a `TrendBucket`.
///
/// A pure fold: applying it twice to the same input set yields a
/// bit-identical bucket, which is what makes open-bucket recomputation on
/// every pass safe. `classifications` are the flakiness classifications
/// current at rollup time.
pub fn rollup(
    repo: &str,
    period: BucketPeriod,
    starts_at: DateTime<Utc>,
    runs: &[&PipelineRun],
    classifications: &[Classification],
    closed: bool,
) -> TrendBucket {
    let total_runs = runs.len();
    let successful_runs = runs.iter().filter(|r| r.status.is_success()).count();

    #[allow(clippy::cast_precision_loss)]
    let success_rate = (total_runs > 0)
        .then(|| (successful_runs as f64 / total_runs as f64) * 100.0);

    let durations: Vec<f64> = runs.iter().filter_map(|r| r.duration_secs()).collect();
    #[allow(clippy::cast_precision_loss)]
    let avg_duration_secs = (!durations.is_empty())
        .then(|| durations.iter().sum::<f64>() / durations.len() as f64);

    let flaky_test_count = classifications
        .iter()
        .filter(|c| matches!(c, Classification::Flaky | Classification::Suspect))
        .count();

    TrendBucket {
        repo: repo.to_string(),
        period,
        starts_at,
        total_runs,
        successful_runs,
        success_rate,
        avg_duration_secs,
        flaky_test_count,
        closed,
    }
}

/// Recomputes a closed bucket from the given runs.
///
/// Closed buckets are otherwise immutable; this is the one sanctioned path
/// and it always leaves a log trail.
pub fn backfill(
    repo: &str,
    period: BucketPeriod,
    starts_at: DateTime<Utc>,
    runs: &[&PipelineRun],
    classifications: &[Classification],
) -> TrendBucket {
    warn!("Backfilling closed {period:?} bucket {starts_at} for {repo}");
    rollup(repo, period, starts_at, runs, classifications, true)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use chrono::TimeZone;

    fn run_at(run_id: &str, status: RunStatus, hour: u32, duration_secs: i64) -> PipelineRun {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 11, hour, 0, 0).unwrap();
        PipelineRun {
            repo: "g/p".to_string(),
            run_id: run_id.to_string(),
            branch: "main".to_string(),
            commit: format!("c-{run_id}"),
            status,
            started_at,
            finished_at: Some(started_at + Duration::seconds(duration_secs)),
            steps: vec![],
            tests: vec![],
        }
    }

    mod bucket_start {
        use super::*;

        #[test]
        fn daily_truncates_to_midnight() {
            let at = Utc.with_ymd_and_hms(2026, 3, 11, 17, 42, 9).unwrap();
            assert_eq!(
                bucket_start(BucketPeriod::Daily, at),
                Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()
            );
        }

        #[test]
        fn weekly_truncates_to_monday() {
            // 2026-03-11 is a Wednesday
            let at = Utc.with_ymd_and_hms(2026, 3, 11, 17, 42, 9).unwrap();
            assert_eq!(
                bucket_start(BucketPeriod::Weekly, at),
                Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()
            );
        }

        #[test]
        fn monday_is_its_own_week_start() {
            let at = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
            assert_eq!(bucket_start(BucketPeriod::Weekly, at), at);
        }

        #[test]
        fn bucket_end_spans_the_period() {
            let start = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
            assert_eq!(
                bucket_end(BucketPeriod::Daily, start),
                start + Duration::days(1)
            );
            assert_eq!(
                bucket_end(BucketPeriod::Weekly, start),
                start + Duration::days(7)
            );
        }
    }

    mod rollup {
        use super::*;

        fn starts() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()
        }

        #[test]
        fn empty_bucket_has_no_rates() {
            let bucket = rollup("g/p", BucketPeriod::Daily, starts(), &[], &[], false);
            assert_eq!(bucket.total_runs, 0);
            assert_eq!(bucket.success_rate, None);
            assert_eq!(bucket.avg_duration_secs, None);
            assert_eq!(bucket.flaky_test_count, 0);
        }

        #[test]
        fn folds_success_rate_and_mean_duration() {
            let runs = vec![
                run_at("1", RunStatus::Success, 8, 100),
                run_at("2", RunStatus::Failed, 9, 200),
                run_at("3", RunStatus::Success, 10, 300),
                run_at("4", RunStatus::Success, 11, 400),
            ];
            let refs: Vec<&PipelineRun> = runs.iter().collect();
            let classifications = [
                Classification::Flaky,
                Classification::Suspect,
                Classification::Stable,
                Classification::PersistentFailure,
                Classification::Quarantined,
            ];

            let bucket = rollup(
                "g/p",
                BucketPeriod::Daily,
                starts(),
                &refs,
                &classifications,
                false,
            );
            assert_eq!(bucket.total_runs, 4);
            assert_eq!(bucket.successful_runs, 3);
            assert_eq!(bucket.success_rate, Some(75.0));
            assert_eq!(bucket.avg_duration_secs, Some(250.0));
            // Only FLAKY and SUSPECT count
            assert_eq!(bucket.flaky_test_count, 2);
            assert!(!bucket.closed);
        }

        #[test]
        fn applied_twice_yields_bit_identical_buckets() {
            let runs = vec![
                run_at("1", RunStatus::Success, 8, 137),
                run_at("2", RunStatus::Error, 9, 253),
                run_at("3", RunStatus::Cancelled, 10, 11),
            ];
            let refs: Vec<&PipelineRun> = runs.iter().collect();
            let classifications = [Classification::Flaky];

            let a = rollup(
                "g/p",
                BucketPeriod::Weekly,
                starts(),
                &refs,
                &classifications,
                false,
            );
            let b = rollup(
                "g/p",
                BucketPeriod::Weekly,
                starts(),
                &refs,
                &classifications,
                false,
            );
            assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&b).unwrap()
            );
        }

        #[test]
        fn unfinished_runs_do_not_enter_the_duration_mean() {
            let mut never_finished = run_at("1", RunStatus::Error, 8, 0);
            never_finished.finished_at = None;
            let finished = run_at("2", RunStatus::Success, 9, 120);
            let runs = vec![&never_finished, &finished];

            let bucket = rollup("g/p", BucketPeriod::Daily, starts(), &runs, &[], false);
            assert_eq!(bucket.avg_duration_secs, Some(120.0));
        }

        #[test]
        fn backfill_marks_bucket_closed() {
            let bucket = backfill("g/p", BucketPeriod::Daily, starts(), &[], &[]);
            assert!(bucket.closed);
        }
    }
}
