//! Canonical catalog of KPI definitions.
//!
//! The registry is an immutable value built once and handed to the
//! [`MetricEngine`](crate::engine::MetricEngine). It is the single source of
//! truth for metric metadata; nothing else defines metrics.

mod definition;
pub mod functions;

pub use definition::{
    Bound, ComputeFn, Directionality, DivisionByZero, MetricDefinition, MetricGrain,
    MetricStatus, MetricTier, MetricType, Thresholds, ValidationRules,
};

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{MetricError, Result};
use functions::*;

/// Immutable, name-indexed set of metric definitions in declaration order.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    metrics: IndexMap<&'static str, MetricDefinition>,
}

impl MetricRegistry {
    /// The canonical registry of all KPIs.
    pub fn standard() -> Self {
        Self::index(standard_definitions())
    }

    /// Build a registry from arbitrary definitions, checking invariants.
    pub(crate) fn from_definitions(definitions: Vec<MetricDefinition>) -> Result<Self> {
        let registry = Self::index(definitions.clone());
        if registry.len() != definitions.len() {
            let mut seen = HashSet::new();
            let duplicate = definitions
                .iter()
                .find(|d| !seen.insert(d.name))
                .map(|d| d.name)
                .unwrap_or_default();
            return Err(MetricError::InvalidRegistry(format!(
                "duplicate metric name {}",
                duplicate
            )));
        }
        registry.validate()?;
        Ok(registry)
    }

    fn index(definitions: Vec<MetricDefinition>) -> Self {
        Self {
            metrics: definitions.into_iter().map(|d| (d.name, d)).collect(),
        }
    }

    /// Check that exactly one North Star exists and every dependency resolves.
    pub fn validate(&self) -> Result<()> {
        let north_stars = self
            .iter()
            .filter(|d| d.metric_type == MetricType::NorthStar)
            .count();
        if north_stars != 1 {
            return Err(MetricError::InvalidRegistry(format!(
                "expected exactly one north star metric, found {}",
                north_stars
            )));
        }

        for def in self.iter() {
            if let Some(dep) = def.dependencies.iter().find(|d| !self.contains(d)) {
                return Err(MetricError::InvalidRegistry(format!(
                    "metric {} depends on unknown metric {}",
                    def.name, dep
                )));
            }
        }
        Ok(())
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Result<&MetricDefinition> {
        self.metrics
            .get(name)
            .ok_or_else(|| MetricError::UnknownMetric {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// The single NORTH_STAR metric.
    pub fn north_star(&self) -> Result<&MetricDefinition> {
        self.iter()
            .find(|d| d.metric_type == MetricType::NorthStar)
            .ok_or_else(|| MetricError::InvalidRegistry("no north star metric".to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.metrics.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.values()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

const USER_COLUMNS: &[&str] = &["user_id"];

fn standard_definitions() -> Vec<MetricDefinition> {
    vec![
        // North Star
        MetricDefinition {
            name: "vpac",
            display_name: "Value per Active Customer (VPAC)",
            grain: MetricGrain::Overall,
            metric_type: MetricType::NorthStar,
            tier: MetricTier::P0Executive,
            directionality: Directionality::HigherIsBetter,
            formula: "Orders per Customer × Items per Order",
            computation: compute_vpac,
            unit: "items/customer",
            owner: "Product Growth",
            owner_role: "Growth",
            description: "Value generated per active customer, combining purchase frequency and basket depth",
            thresholds: Thresholds { min: Some(0.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["orders_per_customer", "avg_basket_size"]),
            dependencies: &["orders_per_customer", "items_per_order"],
        },
        // Drivers
        MetricDefinition {
            name: "active_customers",
            display_name: "Active Customers",
            grain: MetricGrain::User,
            metric_type: MetricType::Driver,
            tier: MetricTier::P1Leadership,
            directionality: Directionality::HigherIsBetter,
            formula: "COUNT(DISTINCT user_id)",
            computation: compute_active_customers,
            unit: "customers",
            owner: "Marketing / Acquisition",
            owner_role: "Growth",
            description: "Number of unique customers who placed at least one order",
            thresholds: Thresholds { min: Some(1.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(USER_COLUMNS),
            dependencies: &[],
        },
        MetricDefinition {
            name: "orders_per_customer",
            display_name: "Orders per Customer",
            grain: MetricGrain::User,
            metric_type: MetricType::Driver,
            tier: MetricTier::P1Leadership,
            directionality: Directionality::HigherIsBetter,
            formula: "AVG(orders per user)",
            computation: compute_orders_per_customer,
            unit: "orders/customer",
            owner: "Product / Retention",
            owner_role: "Lifecycle",
            description: "Average number of orders per active customer (purchase frequency)",
            thresholds: Thresholds { min: Some(1.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["user_id", "orders_per_customer"]),
            dependencies: &[],
        },
        MetricDefinition {
            name: "items_per_order",
            display_name: "Items per Order",
            grain: MetricGrain::User,
            metric_type: MetricType::Driver,
            tier: MetricTier::P1Leadership,
            directionality: Directionality::HigherIsBetter,
            formula: "AVG(items per order)",
            computation: compute_items_per_order,
            unit: "items/order",
            owner: "Product / Merchandising",
            owner_role: "Merchandising",
            description: "Average basket size (items per order)",
            thresholds: Thresholds { min: Some(1.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["user_id", "avg_basket_size"]),
            dependencies: &[],
        },
        // Supporting KPIs
        MetricDefinition {
            name: "reorder_rate",
            display_name: "Reorder Rate",
            grain: MetricGrain::User,
            metric_type: MetricType::Diagnostic,
            tier: MetricTier::P2Operational,
            directionality: Directionality::HigherIsBetter,
            formula: "Reordered Items / Total Items",
            computation: compute_reorder_rate,
            unit: "rate",
            owner: "Product / Retention",
            owner_role: "Lifecycle",
            description: "Percentage of items that are reorders (loyalty indicator)",
            thresholds: Thresholds { min: Some(0.0), max: Some(1.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["user_id", "reorder_rate"]),
            dependencies: &[],
        },
        MetricDefinition {
            name: "total_orders",
            display_name: "Total Orders",
            grain: MetricGrain::Overall,
            metric_type: MetricType::Diagnostic,
            tier: MetricTier::P3Diagnostic,
            directionality: Directionality::Neutral,
            formula: "SUM(orders)",
            computation: compute_total_orders,
            unit: "orders",
            owner: "Product Growth",
            owner_role: "Analytics",
            description: "Total number of orders placed",
            thresholds: Thresholds { min: Some(0.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["orders"]),
            dependencies: &[],
        },
        MetricDefinition {
            name: "total_items",
            display_name: "Total Items",
            grain: MetricGrain::Overall,
            metric_type: MetricType::Diagnostic,
            tier: MetricTier::P3Diagnostic,
            directionality: Directionality::Neutral,
            formula: "SUM(items)",
            computation: compute_total_items,
            unit: "items",
            owner: "Product Growth",
            owner_role: "Analytics",
            description: "Total number of items ordered",
            thresholds: Thresholds { min: Some(0.0), ..Thresholds::NONE },
            validation_rules: ValidationRules::requiring(&["items"]),
            dependencies: &[],
        },
        // Guardrails
        MetricDefinition {
            name: "small_basket_share",
            display_name: "Small Basket Share",
            grain: MetricGrain::User,
            metric_type: MetricType::Guardrail,
            tier: MetricTier::P2Operational,
            directionality: Directionality::LowerIsBetter,
            formula: "% of orders with ≤3 items",
            computation: compute_small_basket_share,
            unit: "rate",
            owner: "Product Quality",
            owner_role: "Merchandising",
            description: "Share of orders with ≤3 items (detects low-quality growth)",
            thresholds: Thresholds {
                min: Some(0.0),
                max: Some(1.0),
                warn_max: Some(0.3),
                ..Thresholds::NONE
            },
            validation_rules: ValidationRules::requiring(&["user_id", "small_basket_share"]),
            dependencies: &[],
        },
        MetricDefinition {
            name: "median_days_since_prior",
            display_name: "Median Days Between Orders",
            grain: MetricGrain::User,
            metric_type: MetricType::Guardrail,
            tier: MetricTier::P2Operational,
            directionality: Directionality::LowerIsBetter,
            formula: "MEDIAN(days_since_prior_order)",
            computation: compute_median_days_since_prior,
            unit: "days",
            owner: "Product / Retention",
            owner_role: "Lifecycle",
            description: "Median days between orders (frequency health check)",
            thresholds: Thresholds {
                min: Some(0.0),
                warn_min: Some(1.0),
                warn_max: Some(21.0),
                ..Thresholds::NONE
            },
            // Customers with a single order have no gap; an all-single-order
            // dataset legitimately has no median.
            validation_rules: ValidationRules {
                allow_null: true,
                ..ValidationRules::requiring(&["user_id", "median_days_since_prior"])
            },
            dependencies: &[],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_is_valid() {
        let registry = MetricRegistry::standard();
        assert!(registry.validate().is_ok());
        assert_eq!(registry.len(), 9);
        assert!(!registry.is_empty());
    }

    #[test]
    fn standard_registry_contains_key_metrics() {
        let registry = MetricRegistry::standard();
        for name in ["vpac", "orders_per_customer", "items_per_order", "reorder_rate"] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert_eq!(
            registry.get("vpac").unwrap().metric_type,
            MetricType::NorthStar
        );
        assert_eq!(
            registry.get("orders_per_customer").unwrap().metric_type,
            MetricType::Driver
        );
    }

    #[test]
    fn north_star_is_vpac() {
        let registry = MetricRegistry::standard();
        let ns = registry.north_star().unwrap();
        assert_eq!(ns.name, "vpac");
        assert_eq!(ns.dependencies, &["orders_per_customer", "items_per_order"]);
    }

    #[test]
    fn unknown_metric_lists_available() {
        let registry = MetricRegistry::standard();
        let err = registry.get("gmv").unwrap_err();
        match err {
            MetricError::UnknownMetric { name, available } => {
                assert_eq!(name, "gmv");
                assert!(available.contains("vpac"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn names_keep_declaration_order() {
        let names = MetricRegistry::standard().names();
        assert_eq!(names[0], "vpac");
        assert_eq!(names[1], "active_customers");
    }

    #[test]
    fn duplicate_names_rejected() {
        let vpac = MetricRegistry::standard().get("vpac").unwrap().clone();
        let err = MetricRegistry::from_definitions(vec![vpac.clone(), vpac]).unwrap_err();
        assert!(matches!(err, MetricError::InvalidRegistry(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn missing_north_star_rejected() {
        let registry = MetricRegistry::standard();
        let defs: Vec<_> = registry
            .iter()
            .filter(|d| d.metric_type != MetricType::NorthStar)
            .cloned()
            .collect();
        assert!(matches!(
            MetricRegistry::from_definitions(defs),
            Err(MetricError::InvalidRegistry(_))
        ));
    }

    #[test]
    fn dangling_dependency_rejected() {
        let vpac = MetricRegistry::standard().get("vpac").unwrap().clone();
        let err = MetricRegistry::from_definitions(vec![vpac]).unwrap_err();
        assert!(matches!(err, MetricError::InvalidRegistry(msg) if msg.contains("depends on")));
    }

    #[test]
    fn validate_checks_thresholds_and_nulls() {
        let registry = MetricRegistry::standard();
        let vpac = registry.get("vpac").unwrap();
        assert_eq!(vpac.validate(Some(10.5)).unwrap(), MetricStatus::Ok);
        assert!(matches!(
            vpac.validate(Some(-1.0)),
            Err(MetricError::ThresholdViolation { bound: Bound::BelowMinimum, .. })
        ));
        assert!(matches!(
            vpac.validate(None),
            Err(MetricError::NullMetricValue(_))
        ));
    }

    #[test]
    fn warn_band_downgrades_status() {
        let registry = MetricRegistry::standard();
        let share = registry.get("small_basket_share").unwrap();
        assert_eq!(share.validate(Some(0.2)).unwrap(), MetricStatus::Ok);
        assert_eq!(share.validate(Some(0.45)).unwrap(), MetricStatus::Warning);
        assert_eq!(share.status(Some(1.5)), MetricStatus::Critical);
    }

    #[test]
    fn allow_null_reports_unknown() {
        let registry = MetricRegistry::standard();
        let days = registry.get("median_days_since_prior").unwrap();
        assert_eq!(days.validate(None).unwrap(), MetricStatus::Unknown);
    }

    #[test]
    fn executive_tiers() {
        let registry = MetricRegistry::standard();
        assert!(registry.get("vpac").unwrap().is_executive());
        assert!(registry.get("active_customers").unwrap().is_executive());
        assert!(!registry.get("reorder_rate").unwrap().is_executive());
        assert!(!registry.get("total_items").unwrap().is_executive());
    }
}
