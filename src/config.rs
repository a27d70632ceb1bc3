use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::BucketPeriod;

/// Configuration file structure for ciscope.
///
/// Every analysis tunable (window sizes, score thresholds, bottleneck
/// floors) is configuration with recognized defaults, never a hardcoded
/// constant. Configuration files are loaded from the current directory or a
/// specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Flakiness detection parameters
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Bottleneck detection parameters
    #[serde(default)]
    pub bottleneck: BottleneckConfig,

    /// Trend aggregation parameters
    #[serde(default)]
    pub trend: TrendConfig,

    /// Orchestrator scheduling parameters
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Persistence settings
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Maximum number of most recent runs in an analysis window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Minimum samples before a score is computed at all
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Score floor applied when pass and fail are observed for one commit
    #[serde(default = "default_same_commit_floor")]
    pub same_commit_floor: f64,

    /// Score at which a stable test becomes suspect
    #[serde(default = "default_suspect_threshold")]
    pub suspect_threshold: f64,

    /// Score at which a suspect test can be confirmed flaky
    #[serde(default = "default_flaky_threshold")]
    pub flaky_threshold: f64,

    /// Consecutive windows at or above the flaky threshold required to
    /// confirm a suspect test as flaky
    #[serde(default = "default_confirm_windows")]
    pub confirm_windows: u32,

    /// Consecutive passing runs (no intervening failure) required to fall
    /// back to stable
    #[serde(default = "default_clean_streak")]
    pub clean_streak: u32,

    /// Failure rate at or above which a non-intermittent test is a
    /// persistent failure rather than a flake
    #[serde(default = "default_persistent_failure_rate")]
    pub persistent_failure_rate: f64,

    /// Share of failures one time/branch group must hold before a pattern
    /// annotation is attached
    #[serde(default = "default_pattern_share")]
    pub pattern_share: f64,

    /// Minimum failures before pattern annotations are considered
    #[serde(default = "default_pattern_min_failures")]
    pub pattern_min_failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BottleneckConfig {
    /// Absolute p90 floor in seconds; fast steps with noisy relative
    /// variance are never flagged
    #[serde(default = "default_absolute_floor_secs")]
    pub absolute_floor_secs: f64,

    /// Multiple of the step's own baseline median the p90 must exceed
    #[serde(default = "default_relative_multiple")]
    pub relative_multiple: f64,

    /// Minimum observations of a step before it can be flagged
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrendConfig {
    /// Bucket period for rollups
    #[serde(default = "default_period")]
    pub period: BucketPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    /// Bound on a single analysis pass, fetch and compute included
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Path of the JSON snapshot store; platform cache dir when unset
    pub path: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            same_commit_floor: default_same_commit_floor(),
            suspect_threshold: default_suspect_threshold(),
            flaky_threshold: default_flaky_threshold(),
            confirm_windows: default_confirm_windows(),
            clean_streak: default_clean_streak(),
            persistent_failure_rate: default_persistent_failure_rate(),
            pattern_share: default_pattern_share(),
            pattern_min_failures: default_pattern_min_failures(),
        }
    }
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            absolute_floor_secs: default_absolute_floor_secs(),
            relative_multiple: default_relative_multiple(),
            min_occurrences: default_min_occurrences(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pass_timeout_secs: default_pass_timeout_secs(),
        }
    }
}

fn default_window_size() -> usize {
    100
}

fn default_min_samples() -> usize {
    5
}

fn default_same_commit_floor() -> f64 {
    70.0
}

fn default_suspect_threshold() -> f64 {
    30.0
}

fn default_flaky_threshold() -> f64 {
    60.0
}

fn default_confirm_windows() -> u32 {
    3
}

fn default_clean_streak() -> u32 {
    10
}

fn default_persistent_failure_rate() -> f64 {
    0.9
}

fn default_pattern_share() -> f64 {
    0.6
}

fn default_pattern_min_failures() -> usize {
    3
}

fn default_absolute_floor_secs() -> f64 {
    20.0
}

fn default_relative_multiple() -> f64 {
    2.0
}

fn default_min_occurrences() -> usize {
    3
}

fn default_period() -> BucketPeriod {
    BucketPeriod::Daily
}

fn default_pass_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./ciscope.toml
    /// 3. ./ciscope.json
    /// 4. ./ciscope.yaml
    /// 5. ./ciscope.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        // Try common configuration file names
        let candidates = ["ciscope.toml", "ciscope.json", "ciscope.yaml", "ciscope.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        // No config file found, return defaults
        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.window_size, 100);
        assert_eq!(config.analysis.min_samples, 5);
        assert_eq!(config.analysis.same_commit_floor, 70.0);
        assert_eq!(config.bottleneck.absolute_floor_secs, 20.0);
        assert_eq!(config.bottleneck.relative_multiple, 2.0);
        assert_eq!(config.orchestrator.pass_timeout_secs, 60);
        assert!(config.store.path.is_none());
        assert_eq!(config.trend.period, BucketPeriod::Daily);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[analysis]
window-size = 50
flaky-threshold = 75.0
clean-streak = 5

[bottleneck]
absolute-floor-secs = 10.0

[trend]
period = "weekly"

[store]
path = "/tmp/ciscope.json"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.analysis.window_size, 50);
        assert_eq!(config.analysis.flaky_threshold, 75.0);
        assert_eq!(config.analysis.clean_streak, 5);
        // Unset fields keep their defaults
        assert_eq!(config.analysis.min_samples, 5);
        assert_eq!(config.bottleneck.absolute_floor_secs, 10.0);
        assert_eq!(config.trend.period, BucketPeriod::Weekly);
        assert_eq!(config.store.path, Some("/tmp/ciscope.json".to_string()));
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "analysis": {
    "suspect-threshold": 25.0,
    "confirm-windows": 2
  },
  "orchestrator": {
    "pass-timeout-secs": 120
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.analysis.suspect_threshold, 25.0);
        assert_eq!(config.analysis.confirm_windows, 2);
        assert_eq!(config.orchestrator.pass_timeout_secs, 120);
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load(Some(Path::new("nonexistent.toml")));
        assert!(config.is_err());
    }

    #[test]
    fn test_load_without_any_candidate_returns_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = Config::load(None).unwrap();
        assert_eq!(config.analysis.window_size, 100);

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ciscope.toml");

        let mut config = Config::default();
        config.analysis.window_size = 42;
        config.bottleneck.relative_multiple = 3.0;
        config.save(&path).unwrap();

        let reloaded = Config::load_from_path(&path).unwrap();
        assert_eq!(reloaded.analysis.window_size, 42);
        assert_eq!(reloaded.bottleneck.relative_multiple, 3.0);
    }
}
