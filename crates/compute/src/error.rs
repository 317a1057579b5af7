use kpi_core::KpiError;

use crate::registry::{Bound, MetricGrain};

/// Errors raised while evaluating, validating, or decomposing metrics.
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("Unknown metric: {name}. Available: {available}")]
    UnknownMetric { name: String, available: String },

    /// The table's aggregation level does not match the metric's grain.
    #[error("Metric {metric} expects {expected} grain: {reason}")]
    GrainMismatch {
        metric: String,
        expected: MetricGrain,
        reason: String,
    },

    #[error("Metric {metric} is missing required columns: {}", missing.join(", "))]
    MissingColumns { metric: String, missing: Vec<String> },

    #[error("Metric {metric} = {value} {bound} {limit}")]
    ThresholdViolation {
        metric: String,
        value: f64,
        bound: Bound,
        limit: f64,
    },

    #[error("Metric {0} is null")]
    NullMetricValue(String),

    #[error("Metric {0} cannot be computed on an empty table")]
    EmptyTable(String),

    #[error("Division by zero while computing {0}")]
    DivisionByZero(String),

    /// Attributed components do not add up to the total change.
    #[error(
        "Decomposition validation failed: components sum to {component_sum:.4}, \
         but total change is {total_change:.4} (error: {:.2}%)",
        error_fraction * 100.0
    )]
    DecompositionError {
        component_sum: f64,
        total_change: f64,
        error_fraction: f64,
    },

    #[error("Invalid period snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid metric registry: {0}")]
    InvalidRegistry(String),

    #[error(transparent)]
    Table(#[from] KpiError),
}

/// Result alias for metric operations.
pub type Result<T> = std::result::Result<T, MetricError>;
