use log::{info, warn};

use crate::error::{CiscopeError, Result};
use crate::model::PipelineRun;
use crate::store::RunStore;

/// Outcome of ingesting one batch of run records.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: usize,
    pub skipped: usize,
    /// Repositories touched by this batch, sorted
    pub repos: Vec<String>,
}

/// Parses a JSON array of run records.
///
/// Each record is decoded and validated individually: a malformed record is
/// skipped with a warning, it never aborts the batch. Only a document that
/// is not a JSON array at all is a hard error.
pub fn parse_batch(raw: &str) -> Result<(Vec<PipelineRun>, usize)> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;

    let mut runs = Vec::with_capacity(values.len());
    let mut skipped = 0;
    for (index, value) in values.into_iter().enumerate() {
        match decode_record(value) {
            Ok(run) => runs.push(run),
            Err(err) => {
                warn!("Skipping record {index}: {err}");
                skipped += 1;
            }
        }
    }
    Ok((runs, skipped))
}

fn decode_record(value: serde_json::Value) -> Result<PipelineRun> {
    let run: PipelineRun = serde_json::from_value(value)
        .map_err(|err| CiscopeError::IngestionData(err.to_string()))?;
    validate(&run)?;
    Ok(run)
}

fn validate(run: &PipelineRun) -> Result<()> {
    if run.repo.trim().is_empty() {
        return Err(CiscopeError::IngestionData("empty repository id".into()));
    }
    if run.run_id.trim().is_empty() {
        return Err(CiscopeError::IngestionData("empty run id".into()));
    }
    if run.commit.trim().is_empty() {
        return Err(CiscopeError::IngestionData(format!(
            "run {} has no commit hash",
            run.run_id
        )));
    }
    if let Some(finished_at) = run.finished_at {
        if finished_at < run.started_at {
            return Err(CiscopeError::IngestionData(format!(
                "run {} finished before it started",
                run.run_id
            )));
        }
    }
    for test in &run.tests {
        if test.test_id.trim().is_empty() {
            return Err(CiscopeError::IngestionData(format!(
                "run {} carries a test outcome without an identity",
                run.run_id
            )));
        }
    }
    Ok(())
}

/// Ingests a batch of records: upserts every valid run keyed by
/// (repo, run id), so re-ingesting a run replaces it rather than
/// double-counting it.
pub async fn ingest_batch<S: RunStore>(store: &S, raw: &str) -> Result<IngestReport> {
    let (runs, skipped) = parse_batch(raw)?;

    let mut repos: Vec<String> = runs.iter().map(|r| r.repo.clone()).collect();
    repos.sort();
    repos.dedup();

    let accepted = runs.len();
    for run in runs {
        store.upsert_run(run).await?;
    }

    info!(
        "Ingested {accepted} runs ({skipped} skipped) across {} repositories",
        repos.len()
    );

    Ok(IngestReport {
        accepted,
        skipped,
        repos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn record(repo: &str, run_id: &str, commit: &str) -> serde_json::Value {
        serde_json::json!({
            "repo": repo,
            "run_id": run_id,
            "branch": "main",
            "commit": commit,
            "status": "success",
            "started_at": "2026-03-11T09:00:00Z",
            "finished_at": "2026-03-11T09:05:00Z",
            "steps": [],
            "tests": []
        })
    }

    #[test]
    fn parses_well_formed_batch() {
        let raw = serde_json::json!([record("g/p", "1", "abc"), record("g/p", "2", "def")]);
        let (runs, skipped) = parse_batch(&raw.to_string()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let raw = serde_json::json!([
            record("g/p", "1", "abc"),
            { "repo": "g/p" },
            record("g/p", "2", "def")
        ]);
        let (runs, skipped) = parse_batch(&raw.to_string()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn record_with_empty_commit_is_skipped() {
        let raw = serde_json::json!([record("g/p", "1", "")]);
        let (runs, skipped) = parse_batch(&raw.to_string()).unwrap();
        assert!(runs.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn record_finishing_before_start_is_skipped() {
        let mut bad = record("g/p", "1", "abc");
        bad["finished_at"] = serde_json::json!("2026-03-11T08:00:00Z");
        let raw = serde_json::json!([bad]);
        let (runs, skipped) = parse_batch(&raw.to_string()).unwrap();
        assert!(runs.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn non_array_document_is_a_hard_error() {
        assert!(parse_batch("{\"repo\": \"g/p\"}").is_err());
    }

    #[tokio::test]
    async fn ingest_reports_touched_repositories() {
        let store = MemoryStore::new();
        let raw = serde_json::json!([
            record("b/b", "1", "abc"),
            record("a/a", "1", "abc"),
            record("a/a", "2", "def")
        ]);

        let report = ingest_batch(&store, &raw.to_string()).await.unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.repos, ["a/a", "b/b"]);
    }

    #[tokio::test]
    async fn reingesting_does_not_duplicate() {
        let store = MemoryStore::new();
        let raw = serde_json::json!([record("g/p", "1", "abc")]).to_string();

        ingest_batch(&store, &raw).await.unwrap();
        ingest_batch(&store, &raw).await.unwrap();

        assert_eq!(store.recent_runs("g/p", 100).await.unwrap().len(), 1);
    }
}
