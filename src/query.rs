use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::Serialize;

use crate::analysis::bottleneck::cmp_f64;
use crate::analysis::trend;
use crate::error::{CiscopeError, Result};
use crate::model::{
    Bottleneck, BucketPeriod, Classification, ClassificationChange, FlakyTestRecord, TrendBucket,
};
use crate::store::RunStore;

/// Read-side view of one repository's analysis state, as rendered by the
/// report command.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub repo: String,
    pub generated_at: DateTime<Utc>,
    /// Flaky records, highest score first
    pub records: Vec<FlakyTestRecord>,
    /// Latest bottleneck set, ranked by estimated time saved
    pub bottlenecks: Vec<Bottleneck>,
    /// Trend buckets for the requested period, oldest first
    pub buckets: Vec<TrendBucket>,
}

/// Flaky records for a repository, optionally filtered by classification,
/// highest score first.
pub async fn list_flaky<S: RunStore>(
    store: &S,
    repo: &str,
    filter: Option<Classification>,
) -> Result<Vec<FlakyTestRecord>> {
    let mut records = store.flaky_records(repo).await?;
    if let Some(classification) = filter {
        records.retain(|r| r.classification == classification);
    }
    records.sort_by(|a, b| cmp_f64(b.score, a.score).then_with(|| a.test_id.cmp(&b.test_id)));
    Ok(records)
}

pub async fn current_bottlenecks<S: RunStore>(store: &S, repo: &str) -> Result<Vec<Bottleneck>> {
    store.bottlenecks(repo).await
}

/// Trend buckets for `[from, to)`, oldest first.
pub async fn trend_range<S: RunStore>(
    store: &S,
    repo: &str,
    period: BucketPeriod,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<TrendBucket>> {
    store.buckets(repo, period, from, to).await
}

pub async fn latest_verdict<S: RunStore>(
    store: &S,
    repo: &str,
    test_id: &str,
) -> Result<FlakyTestRecord> {
    store
        .flaky_record(repo, test_id)
        .await?
        .ok_or_else(|| CiscopeError::UnknownTest(test_id.to_string()))
}

/// Excludes a test from scoring until explicitly lifted.
///
/// Quarantine is an external override: once applied, analysis passes keep
/// the record's score current but never change the classification.
pub async fn quarantine<S: RunStore>(store: &S, repo: &str, test_id: &str) -> Result<()> {
    let mut record = latest_verdict(store, repo, test_id).await?;
    if record.classification == Classification::Quarantined {
        return Ok(());
    }

    record.history.push(ClassificationChange {
        at: Utc::now(),
        from: record.classification,
        to: Classification::Quarantined,
        reason: "quarantined by operator".to_string(),
    });
    record.classification = Classification::Quarantined;
    store.put_flaky_record(record).await?;
    info!("Quarantined {test_id} in {repo}");
    Ok(())
}

/// Lifts a quarantine.
///
/// The record re-enters scoring from scratch; the next analysis pass
/// reclassifies it from its current window.
pub async fn unquarantine<S: RunStore>(store: &S, repo: &str, test_id: &str) -> Result<()> {
    let mut record = latest_verdict(store, repo, test_id).await?;
    if record.classification != Classification::Quarantined {
        return Ok(());
    }

    record.history.push(ClassificationChange {
        at: Utc::now(),
        from: Classification::Quarantined,
        to: Classification::InsufficientData,
        reason: "quarantine lifted by operator".to_string(),
    });
    record.classification = Classification::InsufficientData;
    store.put_flaky_record(record).await?;
    info!("Lifted quarantine on {test_id} in {repo}");
    Ok(())
}

/// Assembles the full report for one repository.
///
/// Trend buckets cover the trailing 30 days (daily) or 12 weeks (weekly)
/// up to and including the open bucket.
pub async fn build_report<S: RunStore>(
    store: &S,
    repo: &str,
    period: BucketPeriod,
    filter: Option<Classification>,
) -> Result<AnalysisReport> {
    let now = Utc::now();
    let to = trend::bucket_end(period, trend::bucket_start(period, now));
    let from = match period {
        BucketPeriod::Daily => to - Duration::days(30),
        BucketPeriod::Weekly => to - Duration::weeks(12),
    };

    Ok(AnalysisReport {
        repo: repo.to_string(),
        generated_at: now,
        records: list_flaky(store, repo, filter).await?,
        bottlenecks: current_bottlenecks(store, repo).await?,
        buckets: trend_range(store, repo, period, from, to).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn record_with_score(
        store: &MemoryStore,
        test_id: &str,
        score: f64,
        classification: Classification,
    ) {
        let mut record = FlakyTestRecord::new("g/p", test_id);
        record.score = score;
        record.classification = classification;
        store.put_flaky_record(record).await.unwrap();
    }

    #[tokio::test]
    async fn list_flaky_sorts_by_score_descending() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::low", 20.0, Classification::Stable).await;
        record_with_score(&store, "b::high", 90.0, Classification::Flaky).await;
        record_with_score(&store, "c::mid", 45.0, Classification::Suspect).await;

        let records = list_flaky(&store, "g/p", None).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(ids, ["b::high", "c::mid", "a::low"]);
    }

    #[tokio::test]
    async fn list_flaky_filters_by_classification() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Flaky).await;
        record_with_score(&store, "b::stable", 5.0, Classification::Stable).await;

        let records = list_flaky(&store, "g/p", Some(Classification::Flaky))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_id, "a::flaky");
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_test_id() {
        let store = MemoryStore::new();
        record_with_score(&store, "z::test", 50.0, Classification::Suspect).await;
        record_with_score(&store, "a::test", 50.0, Classification::Suspect).await;

        let records = list_flaky(&store, "g/p", None).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(ids, ["a::test", "z::test"]);
    }

    #[tokio::test]
    async fn quarantine_overrides_and_records_history() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Flaky).await;

        quarantine(&store, "g/p", "a::flaky").await.unwrap();

        let record = latest_verdict(&store, "g/p", "a::flaky").await.unwrap();
        assert_eq!(record.classification, Classification::Quarantined);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].from, Classification::Flaky);
    }

    #[tokio::test]
    async fn quarantine_is_idempotent() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Flaky).await;

        quarantine(&store, "g/p", "a::flaky").await.unwrap();
        quarantine(&store, "g/p", "a::flaky").await.unwrap();

        let record = latest_verdict(&store, "g/p", "a::flaky").await.unwrap();
        assert_eq!(record.history.len(), 1, "no duplicate transition recorded");
    }

    #[tokio::test]
    async fn unquarantine_resets_for_reclassification() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Quarantined).await;

        unquarantine(&store, "g/p", "a::flaky").await.unwrap();

        let record = latest_verdict(&store, "g/p", "a::flaky").await.unwrap();
        assert_eq!(record.classification, Classification::InsufficientData);
    }

    #[tokio::test]
    async fn unquarantine_of_active_record_is_a_no_op() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Flaky).await;

        unquarantine(&store, "g/p", "a::flaky").await.unwrap();

        let record = latest_verdict(&store, "g/p", "a::flaky").await.unwrap();
        assert_eq!(record.classification, Classification::Flaky);
        assert!(record.history.is_empty());
    }

    #[tokio::test]
    async fn quarantining_an_unknown_test_fails() {
        let store = MemoryStore::new();
        let err = quarantine(&store, "g/p", "no::such").await.unwrap_err();
        assert!(matches!(err, CiscopeError::UnknownTest(_)));
    }

    #[tokio::test]
    async fn report_assembles_all_sections() {
        let store = MemoryStore::new();
        record_with_score(&store, "a::flaky", 80.0, Classification::Flaky).await;

        let report = build_report(&store, "g/p", BucketPeriod::Daily, None)
            .await
            .unwrap();
        assert_eq!(report.repo, "g/p");
        assert_eq!(report.records.len(), 1);
        assert!(report.bottlenecks.is_empty());
        assert!(report.buckets.is_empty());
    }
}
