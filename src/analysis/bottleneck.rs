use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::config::BottleneckConfig;
use crate::model::{Bottleneck, BottleneckKind, PipelineRun, RunStatus, Step};

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Median and p90 of a duration distribution.
///
/// Index arithmetic over the sorted values; for tiny datasets both collapse
/// toward the same value.
fn median_p90(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| cmp_f64(*a, *b));

    let len = sorted.len();
    let median_idx = (len / 2).min(len - 1);
    let p90_idx = (len * 90 / 100).min(len - 1);

    (sorted[median_idx], sorted[p90_idx])
}

/// Analyzes the window's runs for slow and serialization bottlenecks.
///
/// Slow: a step's p90 exceeds both the absolute floor and a relative
/// multiple of the step's own baseline median within this repository
/// (self-baseline; absolute durations are incomparable across
/// repositories). Serialization: step pairs with no declared dependency
/// that never overlap in wall-clock time in any run where both appear.
///
/// Output is ranked by estimated time saved descending, ties broken by step
/// name ascending so repeated passes over the same window are
/// bit-identical.
pub fn analyze(config: &BottleneckConfig, repo: &str, runs: &[PipelineRun]) -> Vec<Bottleneck> {
    let mut bottlenecks = slow_steps(config, repo, runs);
    bottlenecks.extend(serialized_pairs(config, repo, runs));

    bottlenecks.sort_by(|a, b| {
        cmp_f64(b.time_saved_secs, a.time_saved_secs).then_with(|| a.step_name.cmp(&b.step_name))
    });
    bottlenecks
}

fn slow_steps(config: &BottleneckConfig, repo: &str, runs: &[PipelineRun]) -> Vec<Bottleneck> {
    // Duration distributions from successfully completed steps only;
    // failed or cancelled steps would skew the baseline
    let mut durations: IndexMap<&str, Vec<f64>> = IndexMap::new();
    for run in runs {
        for step in &run.steps {
            if step.status == RunStatus::Success {
                if let Some(duration) = step.duration_secs() {
                    durations.entry(step.name.as_str()).or_default().push(duration);
                }
            }
        }
    }

    durations
        .into_iter()
        .filter(|(_, values)| values.len() >= config.min_occurrences)
        .filter_map(|(name, values)| {
            let (median, p90) = median_p90(&values);
            let flagged =
                p90 > config.absolute_floor_secs && p90 > config.relative_multiple * median;
            #[allow(clippy::cast_precision_loss)]
            flagged.then(|| Bottleneck {
                repo: repo.to_string(),
                step_name: name.to_string(),
                kind: BottleneckKind::Slow,
                median_secs: median,
                p90_secs: p90,
                baseline_median_secs: median,
                occurrences: values.len(),
                time_saved_secs: (p90 - median) * values.len() as f64,
            })
        })
        .collect()
}

/// Whether two steps both declare dependencies and neither depends on the
/// other. `None` dependency metadata makes a step ineligible: without a
/// declaration we cannot tell serialization from a genuine ordering.
fn declared_independent(a: &Step, b: &Step) -> bool {
    match (&a.depends_on, &b.depends_on) {
        (Some(a_deps), Some(b_deps)) => {
            !a_deps.iter().any(|d| d == &b.name) && !b_deps.iter().any(|d| d == &a.name)
        }
        _ => false,
    }
}

fn serialized_pairs(config: &BottleneckConfig, repo: &str, runs: &[PipelineRun]) -> Vec<Bottleneck> {
    // Distinct step names in first-seen order
    let mut names: IndexMap<&str, ()> = IndexMap::new();
    for run in runs {
        for step in &run.steps {
            names.entry(step.name.as_str()).or_insert(());
        }
    }
    let names: Vec<&str> = names.into_keys().collect();

    let mut bottlenecks = vec![];
    for (i, &a_name) in names.iter().enumerate() {
        for &b_name in &names[i + 1..] {
            if let Some(bottleneck) = serialized_pair(config, repo, runs, a_name, b_name) {
                bottlenecks.push(bottleneck);
            }
        }
    }
    bottlenecks
}

fn serialized_pair(
    config: &BottleneckConfig,
    repo: &str,
    runs: &[PipelineRun],
    a_name: &str,
    b_name: &str,
) -> Option<Bottleneck> {
    let mut co_occurrences = 0;
    let mut a_durations = vec![];
    let mut b_durations = vec![];

    for run in runs {
        let (Some(a), Some(b)) = (
            run.steps.iter().find(|s| s.name == a_name),
            run.steps.iter().find(|s| s.name == b_name),
        ) else {
            continue;
        };
        if !declared_independent(a, b) {
            return None;
        }
        match a.overlaps(b) {
            // A single observed overlap clears the pair
            Some(true) => return None,
            Some(false) => {
                co_occurrences += 1;
                a_durations.extend(a.duration_secs());
                b_durations.extend(b.duration_secs());
            }
            None => {}
        }
    }

    if co_occurrences < config.min_occurrences {
        return None;
    }

    let (a_median, _) = median_p90(&a_durations);
    let (b_median, _) = median_p90(&b_durations);
    // Running the pair in parallel saves the shorter of the two
    let saved_per_run = a_median.min(b_median);

    // Attach the bottleneck to the lexicographically-first step so the pair
    // is reported deterministically
    let (step_name, peer, median, p90) = if a_name <= b_name {
        (a_name, b_name, a_median, median_p90(&a_durations).1)
    } else {
        (b_name, a_name, b_median, median_p90(&b_durations).1)
    };

    #[allow(clippy::cast_precision_loss)]
    Some(Bottleneck {
        repo: repo.to_string(),
        step_name: step_name.to_string(),
        kind: BottleneckKind::Serialization {
            peer: peer.to_string(),
        },
        median_secs: median,
        p90_secs: p90,
        baseline_median_secs: median,
        occurrences: co_occurrences,
        time_saved_secs: saved_per_run * co_occurrences as f64,
    })
}
