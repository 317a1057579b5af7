//! Data quality checks over input tables.
//!
//! Checks produce [`QualityCheckResult`]s: errors block trust in downstream
//! metrics, warnings are advisory, info records a passing check.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use kpi_core::config::{MetricConfig, MonotonicRule, Relation};
use kpi_core::{Table, Value};

use crate::error::Result;
use crate::stats;

const COUNT_KEYWORDS: &[&str] = &["count", "total", "orders", "items", "customers"];
const RATE_KEYWORDS: &[&str] = &["rate", "share"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for CheckSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckSeverity::Info => write!(f, "info"),
            CheckSeverity::Warning => write!(f, "warning"),
            CheckSeverity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub check_name: String,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl QualityCheckResult {
    fn pass(check_name: String, message: String, details: serde_json::Value) -> Self {
        Self {
            check_name,
            passed: true,
            severity: CheckSeverity::Info,
            message,
            details,
        }
    }

    fn fail(
        check_name: String,
        severity: CheckSeverity,
        message: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            check_name,
            passed: false,
            severity,
            message,
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    /// Absolute z-score (sample standard deviation) above the threshold.
    Zscore,
    /// Outside `[q1 - t·iqr, q3 + t·iqr]`.
    Iqr,
}

/// Indices of `values` flagged as outliers.
///
/// A constant series (zero spread) has no outliers.
pub fn detect_outliers(values: &[f64], method: OutlierMethod, threshold: f64) -> Vec<usize> {
    let flag = |pred: &dyn Fn(f64) -> bool| -> Vec<usize> {
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| pred(**v))
            .map(|(i, _)| i)
            .collect()
    };
    match method {
        OutlierMethod::Zscore => {
            let (Some(mean), Some(sd)) = (stats::mean(values), stats::sample_stddev(values)) else {
                return Vec::new();
            };
            if sd == 0.0 {
                return Vec::new();
            }
            flag(&|v| ((v - mean) / sd).abs() > threshold)
        }
        OutlierMethod::Iqr => {
            let (Some(q1), Some(q3)) = (stats::quantile(values, 0.25), stats::quantile(values, 0.75))
            else {
                return Vec::new();
            };
            let iqr = q3 - q1;
            let (lo, hi) = (q1 - threshold * iqr, q3 + threshold * iqr);
            flag(&|v| v < lo || v > hi)
        }
    }
}

/// Runs checks and keeps the results of the last run.
#[derive(Debug, Clone)]
pub struct DataQualityChecker {
    max_missing_rate: f64,
    min_rows: usize,
    relationships: Vec<MonotonicRule>,
    results: Vec<QualityCheckResult>,
}

impl Default for DataQualityChecker {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl DataQualityChecker {
    pub fn new(max_missing_rate: f64) -> Self {
        Self {
            max_missing_rate,
            min_rows: 100,
            relationships: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Thresholds and monotonic rules from the metrics configuration.
    pub fn from_config(config: &MetricConfig) -> Self {
        Self {
            min_rows: config.min_sample_size,
            relationships: config.monotonic_relationships.clone(),
            ..Self::new(config.max_missing_rate)
        }
    }

    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows;
        self
    }

    pub fn results(&self) -> &[QualityCheckResult] {
        &self.results
    }

    pub fn record(&mut self, result: QualityCheckResult) {
        if !result.passed {
            warn!(check = %result.check_name, severity = %result.severity, "{}", result.message);
        }
        self.results.push(result);
    }

    /// Null-rate, row-count and numeric-range checks. Replaces earlier results.
    pub fn run_all_checks(&mut self, table: &Table, name: &str) -> &[QualityCheckResult] {
        self.results.clear();
        self.check_null_values(table);
        self.check_row_count(table, name, self.min_rows);
        self.check_numeric_ranges(table);
        debug!(dataset = name, checks = self.results.len(), "quality checks complete");
        &self.results
    }

    /// Monotonic rules from configuration whose columns are present.
    pub fn check_configured_relationships(&mut self, table: &Table) -> Result<()> {
        for rule in self.relationships.clone() {
            if !table.has_column(&rule.left) || !table.has_column(&rule.right) {
                debug!(left = %rule.left, right = %rule.right, "skipping monotonic rule");
                continue;
            }
            let result =
                self.check_monotonic_relationship(table, &rule.left, &rule.right, rule.relation)?;
            self.record(result);
        }
        Ok(())
    }

    pub fn check_null_values(&mut self, table: &Table) {
        let total = table.row_count();
        for (idx, column) in table.columns.iter().enumerate() {
            let null_count = table
                .rows
                .iter()
                .filter(|r| r.get(idx).map_or(true, Value::is_null))
                .count();
            let null_rate = if total == 0 {
                0.0
            } else {
                null_count as f64 / total as f64
            };
            let details = json!({ "column": column, "null_count": null_count, "null_rate": null_rate });
            let check_name = format!("null_check_{}", column);

            let result = if null_rate > self.max_missing_rate {
                QualityCheckResult::fail(
                    check_name,
                    CheckSeverity::Warning,
                    format!(
                        "Column '{}' has {:.1}% missing values (threshold: {:.1}%)",
                        column,
                        null_rate * 100.0,
                        self.max_missing_rate * 100.0
                    ),
                    details,
                )
            } else {
                QualityCheckResult::pass(
                    check_name,
                    format!("Column '{}' null rate OK: {:.1}%", column, null_rate * 100.0),
                    details,
                )
            };
            self.record(result);
        }
    }

    pub fn check_row_count(&mut self, table: &Table, name: &str, min_rows: usize) {
        let row_count = table.row_count();
        let result = if row_count < min_rows {
            QualityCheckResult::fail(
                "row_count_check".to_string(),
                CheckSeverity::Error,
                format!(
                    "Dataset '{}' has only {} rows (minimum: {})",
                    name, row_count, min_rows
                ),
                json!({ "row_count": row_count, "min_rows": min_rows }),
            )
        } else {
            QualityCheckResult::pass(
                "row_count_check".to_string(),
                format!("Dataset '{}' has sufficient rows: {}", name, row_count),
                json!({ "row_count": row_count }),
            )
        };
        self.record(result);
    }

    /// Count-like columns must be non-negative; rate-like columns within [0, 1].
    pub fn check_numeric_ranges(&mut self, table: &Table) {
        for column in &table.columns {
            let Ok(values) = table.f64_column(column) else {
                continue;
            };
            let lower = column.to_lowercase();
            let values: Vec<f64> = values.into_iter().flatten().collect();

            if COUNT_KEYWORDS.iter().any(|k| lower.contains(k)) {
                let negative = values.iter().filter(|v| **v < 0.0).count();
                let check_name = format!("range_check_{}", column);
                let result = if negative > 0 {
                    QualityCheckResult::fail(
                        check_name,
                        CheckSeverity::Error,
                        format!("Column '{}' has {} negative values (should be >= 0)", column, negative),
                        json!({ "column": column, "negative_count": negative }),
                    )
                } else {
                    QualityCheckResult::pass(
                        check_name,
                        format!("Column '{}' range OK (all values >= 0)", column),
                        json!({ "column": column }),
                    )
                };
                self.record(result);
            }

            if RATE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                let out_of_range = values.iter().filter(|v| !(0.0..=1.0).contains(*v)).count();
                if out_of_range > 0 {
                    self.record(QualityCheckResult::fail(
                        format!("range_check_{}", column),
                        CheckSeverity::Warning,
                        format!("Column '{}' has {} values outside [0, 1]", column, out_of_range),
                        json!({ "column": column, "out_of_range_count": out_of_range }),
                    ));
                }
            }
        }
    }

    /// Row-wise `left <relation> right`. Rows with a null on either side are
    /// not counted as violations.
    pub fn check_monotonic_relationship(
        &self,
        table: &Table,
        left: &str,
        right: &str,
        relation: Relation,
    ) -> Result<QualityCheckResult> {
        let a = table.f64_column(left)?;
        let b = table.f64_column(right)?;
        let violations = a
            .iter()
            .zip(&b)
            .filter(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => match relation {
                    Relation::GreaterOrEqual => x < y,
                    Relation::LessOrEqual => x > y,
                },
                _ => false,
            })
            .count();
        let total = table.row_count();
        let violation_rate = if total == 0 {
            0.0
        } else {
            violations as f64 / total as f64
        };

        let check_name = format!("monotonic_{}_{}", left, right);
        let message = format!(
            "Monotonic check: {} {} {} - {} violations ({:.1}%)",
            left,
            relation,
            right,
            violations,
            violation_rate * 100.0
        );
        let details = json!({
            "col1": left,
            "col2": right,
            "relationship": relation.to_string(),
            "violations": violations,
            "violation_rate": violation_rate,
        });
        Ok(if violations == 0 {
            QualityCheckResult::pass(check_name, message, details)
        } else {
            QualityCheckResult::fail(check_name, CheckSeverity::Error, message, details)
        })
    }

    /// Row-wise equality of two numeric columns.
    pub fn check_column_equality(
        &self,
        table: &Table,
        left: &str,
        right: &str,
    ) -> Result<QualityCheckResult> {
        let a = table.f64_column(left)?;
        let b = table.f64_column(right)?;
        let mismatches = a.iter().zip(&b).filter(|(x, y)| x != y).count();

        let check_name = format!("equality_{}_{}", left, right);
        let details = json!({ "col1": left, "col2": right, "mismatches": mismatches });
        Ok(if mismatches == 0 {
            QualityCheckResult::pass(
                check_name,
                format!("Columns '{}' and '{}' match on every row", left, right),
                details,
            )
        } else {
            QualityCheckResult::fail(
                check_name,
                CheckSeverity::Error,
                format!(
                    "Columns '{}' and '{}' differ on {} rows",
                    left, right, mismatches
                ),
                details,
            )
        })
    }

    pub fn has_errors(&self) -> bool {
        self.results
            .iter()
            .any(|r| !r.passed && r.severity == CheckSeverity::Error)
    }

    pub fn summary_report(&self) -> String {
        if self.results.is_empty() {
            return "No quality checks run yet.".to_string();
        }

        let rule = "=".repeat(70);
        let total = self.results.len();
        let passed = self.results.iter().filter(|r| r.passed).count();
        let failed = total - passed;
        let count_failed = |severity: CheckSeverity| {
            self.results
                .iter()
                .filter(|r| !r.passed && r.severity == severity)
                .count()
        };

        let mut lines = vec![
            String::new(),
            rule.clone(),
            "DATA QUALITY CHECK SUMMARY".to_string(),
            rule.clone(),
            String::new(),
            format!("Total Checks: {}", total),
            format!("  ✓ Passed: {}", passed),
            format!("  ✗ Failed: {}", failed),
            format!("    - Errors: {}", count_failed(CheckSeverity::Error)),
            format!("    - Warnings: {}", count_failed(CheckSeverity::Warning)),
        ];

        if failed > 0 {
            lines.push(String::new());
            lines.push("⚠️  FAILED CHECKS:".to_string());
            lines.push("-".repeat(70));
            for r in self.results.iter().filter(|r| !r.passed) {
                let icon = if r.severity == CheckSeverity::Error {
                    "❌"
                } else {
                    "⚠️"
                };
                lines.push(format!("  {} {}", icon, r.message));
            }
        }
        lines.push(String::new());
        lines.push(rule);
        lines.join("\n")
    }
}
