use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::ingest;
use crate::model::{BucketPeriod, Classification};
use crate::orchestrator::Orchestrator;
use crate::output;
use crate::query;
use crate::store::JsonStore;

#[derive(Parser)]
#[command(name = "ciscope")]
#[command(author, version, about = "CI Pipeline Analysis Engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write results as JSON to this path instead of rendering tables
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Configuration file (ciscope.toml/json/yaml in cwd by default)
    #[arg(short, long, global = true, env = "CISCOPE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a batch of run records and analyze the touched repositories
    Analyze {
        /// JSON file containing an array of run records
        #[arg(short, long)]
        input: PathBuf,

        /// Restrict analysis to one repository
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Render the current analysis state for a repository
    Report {
        #[arg(short, long)]
        repo: String,

        /// Only show tests with this classification
        #[arg(short = 'C', long, value_enum)]
        classification: Option<Classification>,

        #[arg(short = 'P', long, value_enum, default_value = "daily")]
        period: BucketPeriod,
    },

    /// Exclude a test from scoring until lifted
    Quarantine {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        test: String,
    },

    /// Lift a quarantine; the next pass reclassifies the test
    Unquarantine {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long)]
        test: String,
    },

    /// Recompute one closed trend bucket from stored runs
    Backfill {
        #[arg(short, long)]
        repo: String,

        #[arg(short = 'P', long, value_enum, default_value = "daily")]
        period: BucketPeriod,

        /// Bucket start date, YYYY-MM-DD (UTC)
        #[arg(short, long)]
        date: String,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let store = Arc::new(JsonStore::open(
            config.store.path.as_deref().map(std::path::Path::new),
        )?);

        match &self.command {
            Commands::Analyze { input, repo } => {
                self.execute_analyze(store, config, input, repo.as_deref())
                    .await
            }
            Commands::Report {
                repo,
                classification,
                period,
            } => {
                self.execute_report(&store, repo, *classification, *period)
                    .await
            }
            Commands::Quarantine { repo, test } => {
                query::quarantine(store.as_ref(), repo, test).await?;
                let record = query::latest_verdict(store.as_ref(), repo, test).await?;
                println!(
                    "{} is now {}",
                    test,
                    output::classification_label(record.classification)
                );
                Ok(())
            }
            Commands::Unquarantine { repo, test } => {
                query::unquarantine(store.as_ref(), repo, test).await?;
                println!("{test} will be reclassified on the next analysis");
                Ok(())
            }
            Commands::Backfill {
                repo,
                period,
                date,
            } => {
                let starts_at = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .with_context(|| format!("Invalid bucket date: {date}"))?
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| anyhow!("Invalid bucket date: {date}"))?
                    .and_utc();

                let orchestrator = Orchestrator::new(store, config);
                let bucket = orchestrator.backfill(repo, *period, starts_at).await?;
                info!(
                    "Backfilled {:?} bucket {} for {repo}: {} runs",
                    bucket.period,
                    bucket.starts_at.format("%Y-%m-%d"),
                    bucket.total_runs
                );
                Ok(())
            }
        }
    }

    async fn execute_analyze(
        &self,
        store: Arc<JsonStore>,
        config: Config,
        input: &PathBuf,
        only_repo: Option<&str>,
    ) -> Result<()> {
        let raw = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read batch file: {}", input.display()))?;
        let report = ingest::ingest_batch(store.as_ref(), &raw).await?;

        let repos: Vec<String> = report
            .repos
            .into_iter()
            .filter(|r| only_repo.map_or(true, |only| only == r))
            .collect();

        let period = config.trend.period;
        let orchestrator = Orchestrator::new(Arc::clone(&store), config);
        // One pass per touched repository; failures stay isolated per repo
        for repo in &repos {
            orchestrator.on_new_data(repo);
        }
        tokio::select! {
            () = orchestrator.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                orchestrator.shutdown();
                orchestrator.wait_idle().await;
                return Err(anyhow!("Analysis interrupted"));
            }
        }

        let reports = futures::future::join_all(
            repos
                .iter()
                .map(|repo| query::build_report(store.as_ref(), repo, period, None)),
        )
        .await;
        for report in reports {
            self.emit(&report?)?;
        }
        Ok(())
    }

    async fn execute_report(
        &self,
        store: &JsonStore,
        repo: &str,
        classification: Option<Classification>,
        period: BucketPeriod,
    ) -> Result<()> {
        let report = query::build_report(store, repo, period, classification).await?;
        self.emit(&report)
    }

    /// JSON to `--output` (or stdout with `--pretty`) when requested,
    /// rendered tables otherwise.
    fn emit(&self, report: &query::AnalysisReport) -> Result<()> {
        if self.output.is_none() && !self.pretty {
            output::print_report(report);
            return Ok(());
        }

        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        if let Some(path) = &self.output {
            std::fs::write(path, json)?;
            info!("Report written to: {}", path.display());
        } else {
            println!("{json}");
        }
        Ok(())
    }
}
