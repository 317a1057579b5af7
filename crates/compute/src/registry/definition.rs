use std::fmt;

use serde::{Deserialize, Serialize};

use kpi_core::Table;

use super::functions::ComputeFault;
use crate::error::{MetricError, Result};

/// Level of aggregation a metric is defined at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricGrain {
    User,
    Order,
    Overall,
    Category,
}

impl MetricGrain {
    /// Column that identifies one row at this grain, if any.
    pub fn key_column(&self) -> Option<&'static str> {
        match self {
            MetricGrain::User => Some("user_id"),
            MetricGrain::Order => Some("order_id"),
            MetricGrain::Category => Some("category"),
            MetricGrain::Overall => None,
        }
    }
}

impl fmt::Display for MetricGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricGrain::User => write!(f, "USER"),
            MetricGrain::Order => write!(f, "ORDER"),
            MetricGrain::Overall => write!(f, "OVERALL"),
            MetricGrain::Category => write!(f, "CATEGORY"),
        }
    }
}

/// Classification of metric purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    NorthStar,
    Driver,
    Guardrail,
    Diagnostic,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::NorthStar => "north_star",
            MetricType::Driver => "driver",
            MetricType::Guardrail => "guardrail",
            MetricType::Diagnostic => "diagnostic",
        }
    }
}

/// Governance priority bucket. Lower value = closer to the executive audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricTier {
    #[serde(rename = "P0_EXECUTIVE")]
    P0Executive = 0,
    #[serde(rename = "P1_LEADERSHIP")]
    P1Leadership = 1,
    #[serde(rename = "P2_OPERATIONAL")]
    P2Operational = 2,
    #[serde(rename = "P3_DIAGNOSTIC")]
    P3Diagnostic = 3,
}

impl MetricTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricTier::P0Executive => "P0_EXECUTIVE",
            MetricTier::P1Leadership => "P1_LEADERSHIP",
            MetricTier::P2Operational => "P2_OPERATIONAL",
            MetricTier::P3Diagnostic => "P3_DIAGNOSTIC",
        }
    }

    /// P0 and P1 metrics belong to the executive layer.
    pub fn is_executive(&self) -> bool {
        matches!(self, MetricTier::P0Executive | MetricTier::P1Leadership)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directionality {
    HigherIsBetter,
    LowerIsBetter,
    Neutral,
}

impl Directionality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directionality::HigherIsBetter => "higher_is_better",
            Directionality::LowerIsBetter => "lower_is_better",
            Directionality::Neutral => "neutral",
        }
    }
}

/// Health classification of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
    Error,
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricStatus::Ok => write!(f, "OK"),
            MetricStatus::Warning => write!(f, "WARNING"),
            MetricStatus::Critical => write!(f, "CRITICAL"),
            MetricStatus::Unknown => write!(f, "UNKNOWN"),
            MetricStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Which hard threshold a value crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    BelowMinimum,
    AboveMaximum,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::BelowMinimum => write!(f, "below minimum"),
            Bound::AboveMaximum => write!(f, "above maximum"),
        }
    }
}

/// What a computation does when it would divide by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivisionByZero {
    Error,
    ReturnZero,
    ReturnNull,
}

/// Hard (`min`/`max`) and advisory (`warn_min`/`warn_max`) bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub warn_min: Option<f64>,
    pub warn_max: Option<f64>,
}

impl Thresholds {
    pub const NONE: Thresholds = Thresholds {
        min: None,
        max: None,
        warn_min: None,
        warn_max: None,
    };

    /// Hard check; `None` when the value lies within `min`/`max`.
    pub fn breach(&self, value: f64) -> Option<(Bound, f64)> {
        if let Some(min) = self.min {
            if value < min {
                return Some((Bound::BelowMinimum, min));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Some((Bound::AboveMaximum, max));
            }
        }
        None
    }

    /// Whether the value falls outside the advisory band.
    pub fn warns(&self, value: f64) -> bool {
        self.warn_min.is_some_and(|w| value < w) || self.warn_max.is_some_and(|w| value > w)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationRules {
    /// An empty input table yields `0.0` instead of failing.
    pub allow_empty: bool,
    /// A null result passes through instead of failing.
    pub allow_null: bool,
    pub division_by_zero: DivisionByZero,
    pub required_columns: &'static [&'static str],
}

impl ValidationRules {
    pub const STRICT: ValidationRules = ValidationRules {
        allow_empty: false,
        allow_null: false,
        division_by_zero: DivisionByZero::ReturnNull,
        required_columns: &[],
    };

    pub const fn requiring(columns: &'static [&'static str]) -> Self {
        ValidationRules {
            required_columns: columns,
            ..Self::STRICT
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::STRICT
    }
}

/// Pure function mapping a table to a nullable scalar.
pub type ComputeFn = fn(&Table) -> std::result::Result<Option<f64>, ComputeFault>;

/// A business metric with its governance metadata.
#[derive(Clone, Serialize)]
pub struct MetricDefinition {
    /// Internal metric name (snake_case), unique within a registry.
    pub name: &'static str,
    pub display_name: &'static str,
    pub grain: MetricGrain,
    pub metric_type: MetricType,
    pub tier: MetricTier,
    pub directionality: Directionality,
    /// How the metric is calculated, as text.
    pub formula: &'static str,
    #[serde(skip)]
    pub computation: ComputeFn,
    pub unit: &'static str,
    /// Team responsible for the metric.
    pub owner: &'static str,
    /// Role accountable for moving the metric (Growth, Lifecycle, ...).
    pub owner_role: &'static str,
    pub description: &'static str,
    pub thresholds: Thresholds,
    pub validation_rules: ValidationRules,
    /// Metrics this one is derived from. Informational only.
    pub dependencies: &'static [&'static str],
}

impl MetricDefinition {
    /// Run the computation function against `table`.
    pub fn compute(&self, table: &Table) -> std::result::Result<Option<f64>, ComputeFault> {
        (self.computation)(table)
    }

    /// Check a value against null handling and hard thresholds.
    ///
    /// Returns the status the value should be reported with.
    pub fn validate(&self, value: Option<f64>) -> Result<MetricStatus> {
        let Some(v) = value else {
            if self.validation_rules.allow_null {
                return Ok(MetricStatus::Unknown);
            }
            return Err(MetricError::NullMetricValue(self.name.to_string()));
        };

        if let Some((bound, limit)) = self.thresholds.breach(v) {
            return Err(MetricError::ThresholdViolation {
                metric: self.name.to_string(),
                value: v,
                bound,
                limit,
            });
        }

        Ok(self.status(value))
    }

    /// Classify a value without failing.
    pub fn status(&self, value: Option<f64>) -> MetricStatus {
        match value {
            None => MetricStatus::Unknown,
            Some(v) if self.thresholds.breach(v).is_some() => MetricStatus::Critical,
            Some(v) if self.thresholds.warns(v) => MetricStatus::Warning,
            Some(_) => MetricStatus::Ok,
        }
    }

    pub fn is_executive(&self) -> bool {
        self.tier.is_executive()
    }
}

impl fmt::Debug for MetricDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetricDefinition(name='{}', type={}, grain={}, tier={})",
            self.name,
            self.metric_type.as_str(),
            self.grain,
            self.tier.as_str()
        )
    }
}
