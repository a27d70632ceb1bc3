use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::model::{
    Classification, ClassificationChange, FlakyTestRecord, OutcomeSample, TestStatus,
};

/// Detector output for one test over one analysis window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakinessVerdict {
    /// Flakiness score, 0-100
    pub score: f64,
    /// What the window evidence alone implies, before hysteresis
    pub classification: Classification,
    pub evidence: Vec<Evidence>,
}

/// Annotations attached to a verdict. Enrichment only, never score inputs
/// (except the same-commit flake, which drives the score floor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "pattern")]
pub enum Evidence {
    /// Pass and fail observed for the identical commit hash
    SameCommitFlake {
        commit: String,
        passes: usize,
        fails: usize,
    },
    /// Failures clustered in a time-of-day or day-of-week group
    TimePattern {
        group: String,
        share: f64,
        failures: usize,
    },
    /// Failures concentrated on one branch
    BranchPattern {
        branch: String,
        share: f64,
        failures: usize,
    },
}

/// Evaluates one test's rolling window of outcomes.
///
/// Samples must be ordered chronologically by run time; skipped outcomes
/// are excluded from all ratios. With fewer than `min_samples` counted
/// outcomes the score is withheld rather than computed on noise.
pub fn evaluate(config: &AnalysisConfig, samples: &[OutcomeSample]) -> FlakinessVerdict {
    let counted: Vec<&OutcomeSample> = samples
        .iter()
        .filter(|s| s.status != TestStatus::Skip)
        .collect();

    if counted.len() < config.min_samples {
        return FlakinessVerdict {
            score: 0.0,
            classification: Classification::InsufficientData,
            evidence: vec![],
        };
    }

    let same_commit = same_commit_flakes(&counted);
    let intermittency = intermittency_ratio(&counted);
    let fail_rate = failure_rate(&counted);

    // Rates near 0 or 1 indicate "stable", not "flaky"; the balance factor
    // is 1.0 at a 50% failure rate and 0.0 at either extreme.
    let balance = 4.0 * fail_rate * (1.0 - fail_rate);
    let mut score = 100.0 * intermittency * balance;

    // Same-commit evidence is the strongest signal and saturates the score
    // regardless of other factors.
    if !same_commit.is_empty() {
        score = score.max(config.same_commit_floor);
    }
    score = score.clamp(0.0, 100.0);

    let classification = if !same_commit.is_empty() {
        Classification::Flaky
    } else if fail_rate >= config.persistent_failure_rate {
        Classification::PersistentFailure
    } else if score >= config.flaky_threshold {
        Classification::Flaky
    } else if score >= config.suspect_threshold {
        Classification::Suspect
    } else {
        Classification::Stable
    };

    let mut evidence: Vec<Evidence> = same_commit
        .into_iter()
        .map(|(commit, passes, fails)| Evidence::SameCommitFlake {
            commit,
            passes,
            fails,
        })
        .collect();
    evidence.extend(time_pattern(config, &counted));
    evidence.extend(branch_pattern(config, &counted));

    FlakinessVerdict {
        score,
        classification,
        evidence,
    }
}

/// Commits with both pass and fail outcomes, sorted by commit hash.
fn same_commit_flakes(samples: &[&OutcomeSample]) -> Vec<(String, usize, usize)> {
    let mut by_commit: HashMap<&str, (usize, usize)> = HashMap::new();
    for sample in samples {
        let entry = by_commit.entry(sample.commit.as_str()).or_insert((0, 0));
        match sample.status {
            TestStatus::Pass => entry.0 += 1,
            TestStatus::Fail => entry.1 += 1,
            TestStatus::Skip => {}
        }
    }

    let mut flakes: Vec<(String, usize, usize)> = by_commit
        .into_iter()
        .filter(|(_, (passes, fails))| *passes > 0 && *fails > 0)
        .map(|(commit, (passes, fails))| (commit.to_string(), passes, fails))
        .collect();
    flakes.sort_by(|a, b| a.0.cmp(&b.0));
    flakes
}

/// Status transitions between consecutive runs over (n - 1).
///
/// A monotonic all-pass or all-fail history yields 0; alternating every run
/// approaches 1.
fn intermittency_ratio(samples: &[&OutcomeSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let transitions = samples
        .windows(2)
        .filter(|pair| pair[0].status != pair[1].status)
        .count();

    #[allow(clippy::cast_precision_loss)]
    {
        transitions as f64 / (samples.len() - 1) as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn failure_rate(samples: &[&OutcomeSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let fails = samples
        .iter()
        .filter(|s| s.status == TestStatus::Fail)
        .count();
    fails as f64 / samples.len() as f64
}

/// Trailing consecutive passing runs with no intervening failure.
fn trailing_clean_streak(samples: &[OutcomeSample]) -> u32 {
    let mut streak = 0;
    for sample in samples.iter().rev() {
        match sample.status {
            TestStatus::Pass => streak += 1,
            TestStatus::Skip => {}
            TestStatus::Fail => break,
        }
    }
    streak
}

fn six_hour_group(at: DateTime<Utc>) -> &'static str {
    match at.hour() {
        0..=5 => "00:00-05:59",
        6..=11 => "06:00-11:59",
        12..=17 => "12:00-17:59",
        _ => "18:00-23:59",
    }
}

#[allow(clippy::cast_precision_loss)]
fn time_pattern(config: &AnalysisConfig, samples: &[&OutcomeSample]) -> Vec<Evidence> {
    let failures: Vec<&&OutcomeSample> = samples
        .iter()
        .filter(|s| s.status == TestStatus::Fail)
        .collect();
    if failures.len() < config.pattern_min_failures {
        return vec![];
    }

    let mut groups: HashMap<String, usize> = HashMap::new();
    for failure in &failures {
        *groups
            .entry(six_hour_group(failure.ran_at).to_string())
            .or_insert(0) += 1;
        *groups
            .entry(format!("{}", failure.ran_at.weekday()))
            .or_insert(0) += 1;
    }

    let total = failures.len() as f64;
    let mut patterns: Vec<Evidence> = groups
        .into_iter()
        .filter_map(|(group, count)| {
            let share = count as f64 / total;
            (share >= config.pattern_share && count >= config.pattern_min_failures).then_some(
                Evidence::TimePattern {
                    group,
                    share,
                    failures: count,
                },
            )
        })
        .collect();
    patterns.sort_by(|a, b| match (a, b) {
        (Evidence::TimePattern { group: ga, .. }, Evidence::TimePattern { group: gb, .. }) => {
            ga.cmp(gb)
        }
        _ => std::cmp::Ordering::Equal,
    });
    patterns
}

#[allow(clippy::cast_precision_loss)]
fn branch_pattern(config: &AnalysisConfig, samples: &[&OutcomeSample]) -> Vec<Evidence> {
    // A branch pattern is only meaningful when the window spans branches
    let mut branches: Vec<&str> = samples.iter().map(|s| s.branch.as_str()).collect();
    branches.sort_unstable();
    branches.dedup();
    if branches.len() < 2 {
        return vec![];
    }

    let failures: Vec<&&OutcomeSample> = samples
        .iter()
        .filter(|s| s.status == TestStatus::Fail)
        .collect();
    if failures.len() < config.pattern_min_failures {
        return vec![];
    }

    let mut by_branch: HashMap<&str, usize> = HashMap::new();
    for failure in &failures {
        *by_branch.entry(failure.branch.as_str()).or_insert(0) += 1;
    }

    let total = failures.len() as f64;
    let mut patterns: Vec<Evidence> = by_branch
        .into_iter()
        .filter_map(|(branch, count)| {
            let share = count as f64 / total;
            (share >= config.pattern_share && count >= config.pattern_min_failures).then_some(
                Evidence::BranchPattern {
                    branch: branch.to_string(),
                    share,
                    failures: count,
                },
            )
        })
        .collect();
    patterns.sort_by(|a, b| match (a, b) {
        (Evidence::BranchPattern { branch: ba, .. }, Evidence::BranchPattern { branch: bb, .. }) => {
            ba.cmp(bb)
        }
        _ => std::cmp::Ordering::Equal,
    });
    patterns
}

/// Applies a verdict to a record through the classification state machine.
///
/// STABLE -> SUSPECT -> FLAKY moves forward on score thresholds (same-commit
/// evidence confirms FLAKY immediately; score-only evidence needs
/// `confirm_windows` consecutive windows). The only automatic path back to
/// STABLE is a sustained clean streak, which bounds how often a score
/// oscillating near a threshold can flip the classification. QUARANTINED is
/// an external override and is never left automatically.
///
/// Re-applying the same window is a no-op: the record keeps the window it
/// last folded in, so retried or coalesced passes cannot double-count, while
/// a re-ingested run that changed an outcome mid-window still rescores.
pub fn advance(
    record: &mut FlakyTestRecord,
    samples: Vec<OutcomeSample>,
    verdict: &FlakinessVerdict,
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) {
    if record.samples == samples {
        return;
    }
    record.samples = samples;
    record.score = verdict.score;
    record.clean_streak = trailing_clean_streak(&record.samples);

    if verdict.score >= config.flaky_threshold {
        record.flaky_streak += 1;
    } else {
        record.flaky_streak = 0;
    }

    let prev = record.classification;
    let next = next_classification(prev, record, verdict, config);
    if next != prev {
        if next == Classification::Stable {
            record.flaky_streak = 0;
        }
        record.history.push(ClassificationChange {
            at: now,
            from: prev,
            to: next,
            reason: transition_reason(next, record, verdict, config),
        });
        record.classification = next;
    }
}

fn next_classification(
    prev: Classification,
    record: &FlakyTestRecord,
    verdict: &FlakinessVerdict,
    config: &AnalysisConfig,
) -> Classification {
    if prev == Classification::Quarantined {
        return Classification::Quarantined;
    }

    // A shrunken window does not reclassify an established record
    if verdict.classification == Classification::InsufficientData {
        return prev;
    }

    // Hysteresis: the only automatic way down is a sustained clean streak
    if record.clean_streak >= config.clean_streak {
        return Classification::Stable;
    }

    if verdict.classification == Classification::PersistentFailure {
        return Classification::PersistentFailure;
    }

    let same_commit = verdict
        .evidence
        .iter()
        .any(|e| matches!(e, Evidence::SameCommitFlake { .. }));

    match prev {
        Classification::InsufficientData | Classification::Stable => {
            if same_commit && verdict.score >= config.flaky_threshold {
                Classification::Flaky
            } else if verdict.score >= config.suspect_threshold {
                Classification::Suspect
            } else {
                Classification::Stable
            }
        }
        Classification::Suspect => {
            if same_commit && verdict.score >= config.flaky_threshold {
                Classification::Flaky
            } else if record.flaky_streak >= config.confirm_windows {
                Classification::Flaky
            } else {
                Classification::Suspect
            }
        }
        Classification::Flaky => Classification::Flaky,
        Classification::PersistentFailure => {
            // No longer failing consistently but not clean either
            if verdict.score >= config.suspect_threshold {
                Classification::Suspect
            } else {
                Classification::PersistentFailure
            }
        }
        Classification::Quarantined => Classification::Quarantined,
    }
}

fn transition_reason(
    next: Classification,
    record: &FlakyTestRecord,
    verdict: &FlakinessVerdict,
    config: &AnalysisConfig,
) -> String {
    match next {
        Classification::Stable => format!(
            "clean streak of {} reached {}",
            record.clean_streak, config.clean_streak
        ),
        Classification::Flaky => {
            if verdict
                .evidence
                .iter()
                .any(|e| matches!(e, Evidence::SameCommitFlake { .. }))
            {
                format!("same-commit flake, score {:.1}", verdict.score)
            } else {
                format!(
                    "score {:.1} held for {} windows",
                    verdict.score, record.flaky_streak
                )
            }
        }
        _ => format!("score {:.1}", verdict.score),
    }
}
