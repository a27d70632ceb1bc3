use std::fmt::Write;

use comfy_table::Cell;

use crate::model::{BottleneckKind, Classification};
use crate::query::AnalysisReport;

use super::styling::{bright, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    classification_cell, create_table, cyan_header, duration_cell, score_cell, success_rate_cell,
    time_saved_cell,
};

/// Prints a human-readable analysis report to stdout.
///
/// Displays color-coded tables showing:
/// - Overview: repository, counts, when the report was generated
/// - Flaky Tests: score, classification, and streaks per test
/// - Bottlenecks: slow and serialized steps ranked by time saved
/// - Trend: per-bucket success rate, mean duration, and flaky count
pub fn print_report(report: &AnalysisReport) {
    println!("{}", render_report(report));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

#[allow(clippy::format_push_string)]
fn render_report(report: &AnalysisReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");
    let flagged = report
        .records
        .iter()
        .filter(|r| {
            matches!(
                r.classification,
                Classification::Flaky | Classification::Suspect
            )
        })
        .count();
    output.push_str(&format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Repository:"),
        cyan(&report.repo),
        dim("Tests tracked:"),
        bright_yellow(report.records.len()),
        dim("Flaky or suspect:"),
        if flagged > 0 {
            bright_red(flagged)
        } else {
            bright_yellow(flagged)
        },
        dim("Bottlenecks:"),
        bright_yellow(report.bottlenecks.len()),
        dim("Generated:"),
        dim(report.generated_at.format("%Y-%m-%d %H:%M UTC"))
    ));

    if report.records.is_empty() && report.bottlenecks.is_empty() && report.buckets.is_empty() {
        output.push_str(&format!(
            "{}\n",
            bright_yellow("No analysis data for this repository yet.")
        ));
        return output;
    }

    if !report.records.is_empty() {
        add_section_header(&mut output, "🎲", "Flaky Tests");

        let mut table = create_table();
        table.set_header(cyan_header(&[
            "Test",
            "Score",
            "Classification",
            "Clean Streak",
            "Samples",
            "Last Change",
        ]));
        for record in report.records.iter().take(20) {
            let last_change = record.history.last().map_or_else(
                || "-".to_string(),
                |change| format!("{}\n{}", change.at.format("%Y-%m-%d"), change.reason),
            );
            table.add_row(vec![
                Cell::new(&record.test_id),
                score_cell(record.score),
                classification_cell(record.classification),
                Cell::new(record.clean_streak),
                Cell::new(record.samples.len()),
                Cell::new(last_change),
            ]);
        }
        if report.records.len() > 20 {
            table.add_row(vec![
                Cell::new(format!("... and {} more", report.records.len() - 20))
                    .fg(comfy_table::Color::DarkGrey),
                Cell::new(""),
                Cell::new(""),
                Cell::new(""),
                Cell::new(""),
                Cell::new(""),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.bottlenecks.is_empty() {
        add_section_header(&mut output, "🐌", "Bottlenecks");

        let mut table = create_table();
        table.set_header(cyan_header(&[
            "#",
            "Step",
            "Kind",
            "Median",
            "P90",
            "Est. Saved",
        ]));
        for (idx, bottleneck) in report.bottlenecks.iter().take(10).enumerate() {
            let kind = match &bottleneck.kind {
                BottleneckKind::Slow => "slow".to_string(),
                BottleneckKind::Serialization { peer } => format!("serialized with {peer}"),
            };
            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&bottleneck.step_name),
                Cell::new(kind),
                duration_cell(Some(bottleneck.median_secs)),
                duration_cell(Some(bottleneck.p90_secs)),
                time_saved_cell(bottleneck.time_saved_secs),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.buckets.is_empty() {
        add_section_header(&mut output, "📈", "Trend");

        let mut table = create_table();
        table.set_header(cyan_header(&[
            "Bucket",
            "Runs",
            "Success",
            "Avg Duration",
            "Flaky Tests",
        ]));
        for bucket in &report.buckets {
            let label = format!(
                "{}{}",
                bucket.starts_at.format("%Y-%m-%d"),
                if bucket.closed { "" } else { " (open)" }
            );
            table.add_row(vec![
                Cell::new(label),
                Cell::new(bucket.total_runs),
                success_rate_cell(bucket.success_rate),
                duration_cell(bucket.avg_duration_secs),
                Cell::new(bucket.flaky_test_count),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    add_section_header(&mut output, "💡", "Next Steps");
    output.push_str(&format!(
        "  {} Quarantine confirmed flaky tests to stop them blocking merges\n\
         \x20 {} Parallelize serialized steps - the saving is already measured\n\
         \x20 {} Persistent failures are broken tests, fix or delete them\n",
        cyan("•"),
        cyan("•"),
        cyan("•")
    ));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Bottleneck, BucketPeriod, ClassificationChange, FlakyTestRecord, TrendBucket,
    };
    use chrono::{TimeZone, Utc};

    fn record(test_id: &str, score: f64, classification: Classification) -> FlakyTestRecord {
        let mut record = FlakyTestRecord::new("g/p", test_id);
        record.score = score;
        record.classification = classification;
        record
    }

    fn report(
        records: Vec<FlakyTestRecord>,
        bottlenecks: Vec<Bottleneck>,
        buckets: Vec<TrendBucket>,
    ) -> AnalysisReport {
        AnalysisReport {
            repo: "g/p".to_string(),
            generated_at: Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap(),
            records,
            bottlenecks,
            buckets,
        }
    }

    #[test]
    fn empty_report_says_so() {
        let output = render_report(&report(vec![], vec![], vec![]));
        assert!(output.contains("g/p"));
        assert!(output.contains("No analysis data"));
        assert!(!output.contains("Flaky Tests"));
    }

    #[test]
    fn flaky_table_lists_scores_and_classifications() {
        let mut flaky = record("suite::intermittent", 82.5, Classification::Flaky);
        flaky.history.push(ClassificationChange {
            at: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            from: Classification::Suspect,
            to: Classification::Flaky,
            reason: "score 82.5 held for 3 windows".to_string(),
        });
        let output = render_report(&report(
            vec![flaky, record("suite::steady", 4.0, Classification::Stable)],
            vec![],
            vec![],
        ));

        assert!(output.contains("Flaky Tests"));
        assert!(output.contains("suite::intermittent"));
        assert!(output.contains("82.5"));
        assert!(output.contains("FLAKY"));
        assert!(output.contains("STABLE"));
        assert!(output.contains("score 82.5 held for 3 windows"));
    }

    #[test]
    fn bottleneck_table_names_serialization_peer() {
        let bottleneck = Bottleneck {
            repo: "g/p".to_string(),
            step_name: "docs".to_string(),
            kind: crate::model::BottleneckKind::Serialization {
                peer: "unit".to_string(),
            },
            median_secs: 40.0,
            p90_secs: 45.0,
            baseline_median_secs: 40.0,
            occurrences: 5,
            time_saved_secs: 200.0,
        };
        let output = render_report(&report(vec![], vec![bottleneck], vec![]));

        assert!(output.contains("Bottlenecks"));
        assert!(output.contains("docs"));
        assert!(output.contains("serialized with unit"));
    }

    #[test]
    fn trend_table_marks_the_open_bucket() {
        let bucket = TrendBucket {
            repo: "g/p".to_string(),
            period: BucketPeriod::Daily,
            starts_at: Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap(),
            total_runs: 14,
            successful_runs: 12,
            success_rate: Some(85.7),
            avg_duration_secs: Some(420.0),
            flaky_test_count: 2,
            closed: false,
        };
        let output = render_report(&report(vec![], vec![], vec![bucket]));

        assert!(output.contains("Trend"));
        assert!(output.contains("2026-03-11 (open)"));
        assert!(output.contains("85.7%"));
        assert!(output.contains("7.0min"));
    }

    #[test]
    fn empty_bucket_renders_na_not_zero() {
        let bucket = TrendBucket {
            repo: "g/p".to_string(),
            period: BucketPeriod::Daily,
            starts_at: Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap(),
            total_runs: 0,
            successful_runs: 0,
            success_rate: None,
            avg_duration_secs: None,
            flaky_test_count: 0,
            closed: true,
        };
        let output = render_report(&report(vec![], vec![], vec![bucket]));
        assert!(output.contains("N/A"));
        assert!(!output.contains("0.0%"));
    }
}
