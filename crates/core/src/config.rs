use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provider::USER_KPI_QUERY;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_f64(profile: &str, key: &str, default: f64) -> f64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Environment ───────────────────────────────────────────────

/// Deployment environment, read from `KPI_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Dev,
    Ci,
    Prod,
}

impl Environment {
    /// Parse a `KPI_ENV` value. Unknown values fall back to `Dev`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "CI" => Environment::Ci,
            "PROD" => Environment::Prod,
            _ => Environment::Dev,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "DEV"),
            Environment::Ci => write!(f, "CI"),
            Environment::Prod => write!(f, "PROD"),
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub environment: Environment,
    pub project: ProjectConfig,
    pub metrics: MetricConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `KPI_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("KPI_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let environment = Environment::parse(&profiled_env_or(p, "KPI_ENV", "DEV"));
        let mut config = Self {
            profile: p.to_string(),
            environment,
            project: ProjectConfig::from_env_profiled(p),
            metrics: MetricConfig::from_env_profiled(p),
        };
        config.apply_environment_overrides();
        config
    }

    /// Build config from the environment, then overlay an optional YAML file.
    ///
    /// The YAML file may carry `project:` and `metrics:` sections; keys it
    /// names replace the environment-derived values, unknown keys are ignored.
    /// Environment-specific overrides are re-applied after the overlay. A
    /// named file that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_env();
        if let Some(path) = path {
            tracing::debug!(?path, "Loading config overlay");
            let content = std::fs::read_to_string(path)?;
            config.apply_yaml(&content)?;
            config.apply_environment_overrides();
        }
        Ok(config)
    }

    /// Overlay the sections of a YAML document onto this config.
    pub fn apply_yaml(&mut self, yaml: &str) -> Result<()> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        if let Some(project) = doc.get("project") {
            self.project = overlay(&self.project, project)?;
        }
        if let Some(metrics) = doc.get("metrics") {
            self.metrics = overlay(&self.metrics, metrics)?;
        }
        Ok(())
    }

    /// CI runs on smaller samples; PROD validates more strictly.
    fn apply_environment_overrides(&mut self) {
        match self.environment {
            Environment::Ci => {
                self.metrics.min_sample_size = self.metrics.min_sample_size.min(50);
            }
            Environment::Prod => {
                self.metrics.max_missing_rate = self.metrics.max_missing_rate.min(0.02);
                self.metrics.decomposition_tolerance =
                    self.metrics.decomposition_tolerance.min(0.005);
            }
            Environment::Dev => {}
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            "Config loaded (profile: {}, env: {}):",
            self.profile_label(),
            self.environment
        );
        tracing::info!("  project:  data_dir={}", self.project.data_dir.display());
        tracing::info!("  query:    {}", self.project.user_kpi_query);
        tracing::info!(
            "  metrics:  min_sample_size={}, max_missing_rate={}, decomposition_tolerance={}",
            self.metrics.min_sample_size,
            self.metrics.max_missing_rate,
            self.metrics.decomposition_tolerance
        );
    }

    /// Return a summary view suitable for report headers.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "environment": self.environment.to_string(),
            "project": {
                "data_dir": self.project.data_dir,
                "user_kpi_query": self.project.user_kpi_query,
            },
            "metrics": {
                "anomaly_z_threshold": self.metrics.anomaly_z_threshold,
                "min_sample_size": self.metrics.min_sample_size,
                "max_missing_rate": self.metrics.max_missing_rate,
                "decomposition_tolerance": self.metrics.decomposition_tolerance,
            },
        })
    }
}

/// Replace the keys of `base` named in `patch`, keeping the rest.
fn overlay<T: Serialize + DeserializeOwned>(base: &T, patch: &serde_yaml::Value) -> Result<T> {
    let mut merged = serde_yaml::to_value(base)?;
    if let (serde_yaml::Value::Mapping(target), serde_yaml::Value::Mapping(source)) =
        (&mut merged, patch)
    {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_yaml::from_value(merged)?)
}

// ── Project ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory the CLI reads `<query>.json` tables from.
    pub data_dir: PathBuf,
    /// Query sent to the data provider for the user-level aggregate table.
    pub user_kpi_query: String,
}

impl ProjectConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "KPI_DATA_DIR", "data")),
            user_kpi_query: profiled_env_or(p, "KPI_USER_QUERY", USER_KPI_QUERY),
        }
    }
}

// ── Metrics ───────────────────────────────────────────────────

/// Expected ordering between two columns, checked row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::GreaterOrEqual => write!(f, ">="),
            Relation::LessOrEqual => write!(f, "<="),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonotonicRule {
    pub left: String,
    pub right: String,
    pub relation: Relation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Standard deviations beyond which a value is anomalous.
    pub anomaly_z_threshold: f64,
    pub min_sample_size: usize,
    /// Allowed relative error when validating a decomposition.
    pub decomposition_tolerance: f64,
    /// Highest tolerated share of missing values per column.
    pub max_missing_rate: f64,
    pub monotonic_relationships: Vec<MonotonicRule>,
}

impl MetricConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            anomaly_z_threshold: profiled_env_f64(p, "KPI_ANOMALY_Z_THRESHOLD", 2.5),
            min_sample_size: profiled_env_usize(p, "KPI_MIN_SAMPLE_SIZE", 100),
            decomposition_tolerance: profiled_env_f64(p, "KPI_DECOMPOSITION_TOLERANCE", 0.01),
            max_missing_rate: profiled_env_f64(p, "KPI_MAX_MISSING_RATE", 0.05),
            monotonic_relationships: vec![MonotonicRule {
                left: "items".to_string(),
                right: "orders".to_string(),
                relation: Relation::GreaterOrEqual,
            }],
        }
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self::from_env_profiled("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dev_config() -> Config {
        Config {
            profile: String::new(),
            environment: Environment::Dev,
            project: ProjectConfig {
                data_dir: PathBuf::from("data"),
                user_kpi_query: USER_KPI_QUERY.to_string(),
            },
            metrics: MetricConfig {
                anomaly_z_threshold: 2.5,
                min_sample_size: 100,
                decomposition_tolerance: 0.01,
                max_missing_rate: 0.05,
                monotonic_relationships: Vec::new(),
            },
        }
    }

    #[test]
    fn environment_parse() {
        assert_eq!(Environment::parse("ci"), Environment::Ci);
        assert_eq!(Environment::parse("PROD"), Environment::Prod);
        assert_eq!(Environment::parse("staging"), Environment::Dev);
    }

    #[test]
    fn yaml_overlay_replaces_named_keys_only() {
        let mut config = dev_config();
        config
            .apply_yaml(
                "metrics:\n  min_sample_size: 10\n  unknown_key: 1\nproject:\n  data_dir: input\n",
            )
            .unwrap();
        assert_eq!(config.metrics.min_sample_size, 10);
        assert_eq!(config.metrics.max_missing_rate, 0.05);
        assert_eq!(config.project.data_dir, PathBuf::from("input"));
        assert_eq!(config.project.user_kpi_query, USER_KPI_QUERY);
    }

    #[test]
    fn yaml_overlay_parses_relationships() {
        let mut config = dev_config();
        config
            .apply_yaml(
                "metrics:\n  monotonic_relationships:\n    - left: items\n      right: orders\n      relation: \">=\"\n",
            )
            .unwrap();
        assert_eq!(
            config.metrics.monotonic_relationships,
            vec![MonotonicRule {
                left: "items".into(),
                right: "orders".into(),
                relation: Relation::GreaterOrEqual,
            }]
        );
    }

    #[test]
    fn yaml_overlay_rejects_bad_types() {
        let mut config = dev_config();
        assert!(config.apply_yaml("metrics:\n  min_sample_size: lots\n").is_err());
    }

    #[test]
    fn prod_tightens_validation() {
        let mut config = dev_config();
        config.environment = Environment::Prod;
        config.apply_environment_overrides();
        assert_eq!(config.metrics.max_missing_rate, 0.02);
        assert_eq!(config.metrics.decomposition_tolerance, 0.005);
    }

    #[test]
    fn ci_lowers_sample_size() {
        let mut config = dev_config();
        config.environment = Environment::Ci;
        config.apply_environment_overrides();
        assert_eq!(config.metrics.min_sample_size, 50);
    }

    #[test]
    fn load_reads_overlay_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metrics:\n  anomaly_z_threshold: 4.0").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.metrics.anomaly_z_threshold, 4.0);
    }

    #[test]
    fn load_without_file_uses_environment() {
        let config = Config::load(None).unwrap();
        assert!(!config.project.user_kpi_query.is_empty());
    }

    #[test]
    fn load_rejects_missing_overlay_file() {
        let err = Config::load(Some(Path::new("/nonexistent/kpi.yaml"))).unwrap_err();
        assert!(matches!(err, crate::error::KpiError::Io(_)));
    }

    #[test]
    fn redacted_summary_shape() {
        let summary = dev_config().redacted_summary();
        assert_eq!(summary["profile"], "default");
        assert_eq!(summary["environment"], "DEV");
        assert_eq!(summary["metrics"]["min_sample_size"], 100);
    }
}
