//! Two-period change attribution for the North Star.
//!
//! VPAC = orders per customer × items per order, so a change between two
//! periods splits into an orders effect, an items effect and an interaction
//! residual. Each driver effect is its delta weighted by the midpoint of the
//! other factor; the residual makes the components sum to the total exactly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kpi_core::config::MetricConfig;

use crate::error::{MetricError, Result};

pub const ORDERS_DRIVER: &str = "orders_per_customer";
pub const ITEMS_DRIVER: &str = "items_per_order";
pub const INTERACTION: &str = "interaction";
pub const TOTAL_STEP: &str = "Total Change";

const DEFAULT_TOLERANCE: f64 = 0.01;

/// North Star value and its two factors for one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodMetrics {
    pub vpac: f64,
    pub orders_per_customer: f64,
    pub items_per_order: f64,
}

impl PeriodMetrics {
    pub fn new(vpac: f64, orders_per_customer: f64, items_per_order: f64) -> Self {
        Self {
            vpac,
            orders_per_customer,
            items_per_order,
        }
    }

    /// Build from a name-keyed snapshot. Every key must be present.
    pub fn from_map(values: &HashMap<String, f64>) -> Result<Self> {
        let get = |key: &str| {
            values
                .get(key)
                .copied()
                .ok_or_else(|| MetricError::InvalidSnapshot(format!("missing key {}", key)))
        };
        Ok(Self {
            vpac: get("vpac")?,
            orders_per_customer: get(ORDERS_DRIVER)?,
            items_per_order: get(ITEMS_DRIVER)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub metric_name: String,
    pub total_change: f64,
    pub absolute_change: f64,
    pub percent_change: f64,
    /// Driver name to contribution, ending with `interaction`.
    pub driver_contributions: IndexMap<String, f64>,
    pub period_start: String,
    pub period_end: String,
    pub computed_at: DateTime<Utc>,
}

/// A driver's contribution and its fraction of the total change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverShare {
    pub driver: String,
    pub contribution: f64,
    pub share: f64,
}

impl DecompositionResult {
    pub fn component_sum(&self) -> f64 {
        self.driver_contributions.values().sum()
    }

    /// Fraction of the total change per driver; zero when nothing changed.
    pub fn driver_shares(&self) -> Vec<DriverShare> {
        self.driver_contributions
            .iter()
            .map(|(driver, &contribution)| DriverShare {
                driver: driver.clone(),
                contribution,
                share: if self.total_change == 0.0 {
                    0.0
                } else {
                    contribution / self.total_change
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Driver,
    Total,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterfallStep {
    pub step: String,
    pub value: f64,
    pub cumulative: f64,
    pub kind: StepKind,
}

/// Decomposes North Star changes and keeps every result it produced.
#[derive(Debug, Clone)]
pub struct Decomposer {
    history: Vec<DecompositionResult>,
    tolerance: f64,
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decomposer {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Decomposer validating with the configured tolerance.
    pub fn from_config(config: &MetricConfig) -> Self {
        Self {
            tolerance: config.decomposition_tolerance,
            ..Self::new()
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn history(&self) -> &[DecompositionResult] {
        &self.history
    }

    pub fn decompose_vpac_change(
        &mut self,
        period1: &PeriodMetrics,
        period2: &PeriodMetrics,
        period1_label: &str,
        period2_label: &str,
    ) -> DecompositionResult {
        let total_change = period2.vpac - period1.vpac;
        let percent_change = if period1.vpac == 0.0 {
            0.0
        } else {
            period2.vpac / period1.vpac - 1.0
        };

        let delta_orders = period2.orders_per_customer - period1.orders_per_customer;
        let delta_items = period2.items_per_order - period1.items_per_order;
        let mid_orders = (period1.orders_per_customer + period2.orders_per_customer) / 2.0;
        let mid_items = (period1.items_per_order + period2.items_per_order) / 2.0;

        let orders_effect = delta_orders * mid_items;
        let items_effect = mid_orders * delta_items;
        let interaction = total_change - (orders_effect + items_effect);

        let mut driver_contributions = IndexMap::new();
        driver_contributions.insert(ORDERS_DRIVER.to_string(), orders_effect);
        driver_contributions.insert(ITEMS_DRIVER.to_string(), items_effect);
        driver_contributions.insert(INTERACTION.to_string(), interaction);

        let result = DecompositionResult {
            metric_name: "vpac".to_string(),
            total_change,
            absolute_change: total_change,
            percent_change,
            driver_contributions,
            period_start: period1_label.to_string(),
            period_end: period2_label.to_string(),
            computed_at: Utc::now(),
        };

        info!(
            from = period1_label,
            to = period2_label,
            total_change,
            orders_effect,
            items_effect,
            interaction,
            "decomposed vpac change"
        );
        self.history.push(result.clone());
        result
    }

    /// Validate with this decomposer's tolerance.
    pub fn validate(&self, result: &DecompositionResult) -> Result<()> {
        validate_decomposition(result, self.tolerance)
    }
}

/// Check that the components sum to the total change.
///
/// The error is relative to `|total_change|`, or absolute when the total is
/// zero. Fails with [`MetricError::DecompositionError`] above `tolerance`.
pub fn validate_decomposition(result: &DecompositionResult, tolerance: f64) -> Result<()> {
    let component_sum = result.component_sum();
    let error = (component_sum - result.total_change).abs();
    let error_fraction = if result.total_change == 0.0 {
        error
    } else {
        error / result.total_change.abs()
    };

    if error_fraction > tolerance {
        return Err(MetricError::DecompositionError {
            component_sum,
            total_change: result.total_change,
            error_fraction,
        });
    }
    debug!(error_fraction, tolerance, "decomposition validated");
    Ok(())
}

/// Waterfall steps: one per driver, then the total.
pub fn create_waterfall_data(result: &DecompositionResult) -> Vec<WaterfallStep> {
    let mut steps = Vec::with_capacity(result.driver_contributions.len() + 1);
    let mut cumulative = 0.0;
    for (driver, &value) in &result.driver_contributions {
        cumulative += value;
        steps.push(WaterfallStep {
            step: driver.clone(),
            value,
            cumulative,
            kind: StepKind::Driver,
        });
    }
    steps.push(WaterfallStep {
        step: TOTAL_STEP.to_string(),
        value: result.total_change,
        cumulative: result.total_change,
        kind: StepKind::Total,
    });
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decompose(p1: PeriodMetrics, p2: PeriodMetrics) -> DecompositionResult {
        Decomposer::new().decompose_vpac_change(&p1, &p2, "P1", "P2")
    }

    #[test]
    fn orders_only_change() {
        let r = decompose(
            PeriodMetrics::new(50.0, 5.0, 10.0),
            PeriodMetrics::new(60.0, 6.0, 10.0),
        );
        assert_eq!(r.total_change, 10.0);
        assert!((r.percent_change - 0.2).abs() < 1e-12);
        assert_eq!(r.driver_contributions[ORDERS_DRIVER], 10.0);
        assert_eq!(r.driver_contributions[ITEMS_DRIVER], 0.0);
        assert_eq!(r.driver_contributions[INTERACTION], 0.0);
        assert!(validate_decomposition(&r, 0.01).is_ok());
    }

    #[test]
    fn zero_base_has_zero_percent_change() {
        let r = decompose(
            PeriodMetrics::new(0.0, 0.0, 0.0),
            PeriodMetrics::new(4.0, 2.0, 2.0),
        );
        assert_eq!(r.percent_change, 0.0);
        assert!((r.component_sum() - r.total_change).abs() < 1e-12);
    }

    #[test]
    fn contributions_keep_driver_order() {
        let r = decompose(
            PeriodMetrics::new(100.0, 10.0, 10.0),
            PeriodMetrics::new(121.0, 11.0, 11.0),
        );
        let keys: Vec<_> = r.driver_contributions.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![ORDERS_DRIVER, ITEMS_DRIVER, INTERACTION]);
    }

    #[test]
    fn history_accumulates() {
        let mut d = Decomposer::new();
        let p = PeriodMetrics::new(1.0, 1.0, 1.0);
        d.decompose_vpac_change(&p, &p, "a", "b");
        d.decompose_vpac_change(&p, &p, "b", "c");
        assert_eq!(d.history().len(), 2);
        assert_eq!(d.history()[1].period_start, "b");
    }

    #[test]
    fn from_map_requires_all_keys() {
        let mut map = HashMap::new();
        map.insert("vpac".to_string(), 12.0);
        map.insert(ORDERS_DRIVER.to_string(), 3.0);
        assert!(matches!(
            PeriodMetrics::from_map(&map),
            Err(MetricError::InvalidSnapshot(_))
        ));
        map.insert(ITEMS_DRIVER.to_string(), 4.0);
        assert_eq!(
            PeriodMetrics::from_map(&map).unwrap(),
            PeriodMetrics::new(12.0, 3.0, 4.0)
        );
    }

    #[test]
    fn zero_total_uses_raw_error() {
        let mut r = decompose(
            PeriodMetrics::new(10.0, 2.0, 5.0),
            PeriodMetrics::new(10.0, 2.0, 5.0),
        );
        assert!(validate_decomposition(&r, 0.01).is_ok());
        r.driver_contributions.insert(INTERACTION.to_string(), 0.5);
        assert!(validate_decomposition(&r, 0.01).is_err());
        assert!(validate_decomposition(&r, 0.6).is_ok());
    }

    #[test]
    fn configured_tolerance() {
        let config = MetricConfig {
            decomposition_tolerance: 0.005,
            ..MetricConfig::default()
        };
        assert_eq!(Decomposer::from_config(&config).tolerance(), 0.005);
        assert_eq!(Decomposer::new().tolerance(), 0.01);
    }

    #[test]
    fn waterfall_ends_with_total() {
        let r = decompose(
            PeriodMetrics::new(100.0, 10.0, 10.0),
            PeriodMetrics::new(121.0, 11.0, 11.0),
        );
        let steps = create_waterfall_data(&r);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].step, ORDERS_DRIVER);
        assert_eq!(steps[0].cumulative, steps[0].value);
        let last = steps.last().unwrap();
        assert_eq!(last.step, TOTAL_STEP);
        assert_eq!(last.kind, StepKind::Total);
        assert!((steps[2].cumulative - last.cumulative).abs() < 1e-9);
    }

    #[test]
    fn driver_shares_sum_to_one() {
        let r = decompose(
            PeriodMetrics::new(100.0, 10.0, 10.0),
            PeriodMetrics::new(121.0, 11.0, 11.0),
        );
        let total: f64 = r.driver_shares().iter().map(|s| s.share).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let flat = decompose(
            PeriodMetrics::new(1.0, 1.0, 1.0),
            PeriodMetrics::new(1.0, 1.0, 1.0),
        );
        assert!(flat.driver_shares().iter().all(|s| s.share == 0.0));
    }
}
