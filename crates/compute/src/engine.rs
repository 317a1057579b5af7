use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use kpi_core::{Config, DataProvider, Table, Value, USER_KPI_QUERY};

use crate::decompose::PeriodMetrics;
use crate::error::{MetricError, Result};
use crate::registry::functions::ComputeFault;
use crate::registry::{
    Directionality, DivisionByZero, MetricDefinition, MetricRegistry, MetricStatus, MetricTier,
    MetricType,
};
use crate::report;

/// One computed metric with its governance metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: &'static str,
    pub display_name: &'static str,
    pub metric_type: MetricType,
    pub tier: MetricTier,
    pub value: Option<f64>,
    pub unit: &'static str,
    pub owner: &'static str,
    pub owner_role: &'static str,
    pub formula: &'static str,
    pub directionality: Directionality,
    pub status: MetricStatus,
    /// Failure message for `ERROR` rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricRecord {
    fn new(def: &MetricDefinition, value: Option<f64>, status: MetricStatus) -> Self {
        Self {
            name: def.name,
            display_name: def.display_name,
            metric_type: def.metric_type,
            tier: def.tier,
            value,
            unit: def.unit,
            owner: def.owner,
            owner_role: def.owner_role,
            formula: def.formula,
            directionality: def.directionality,
            status,
            error: None,
        }
    }

    fn failed(def: &MetricDefinition, err: &MetricError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(def, None, MetricStatus::Error)
        }
    }
}

/// Column layout of a metrics table.
pub const METRIC_TABLE_COLUMNS: &[&str] = &[
    "name",
    "display_name",
    "metric_type",
    "tier",
    "value",
    "unit",
    "owner",
    "owner_role",
    "formula",
    "directionality",
    "status",
];

/// Render metric records as a [`Table`] for reporting consumers.
pub fn records_to_table(records: &[MetricRecord]) -> Table {
    Table {
        columns: METRIC_TABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records
            .iter()
            .map(|r| {
                vec![
                    r.name.into(),
                    r.display_name.into(),
                    r.metric_type.as_str().into(),
                    r.tier.as_str().into(),
                    r.value.into(),
                    r.unit.into(),
                    r.owner.into(),
                    r.owner_role.into(),
                    r.formula.into(),
                    r.directionality.as_str().into(),
                    r.status.into(),
                ]
            })
            .collect(),
    }
}

/// The North Star value together with the driver values it is built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NorthStarBreakdown {
    pub metric: &'static str,
    pub display_name: &'static str,
    pub value: Option<f64>,
    pub formula: &'static str,
    /// Dependency name to computed value, in dependency order.
    pub components: IndexMap<&'static str, Option<f64>>,
    pub unit: &'static str,
    pub owner: &'static str,
    pub tier: MetricTier,
}

impl NorthStarBreakdown {
    /// Snapshot usable as one side of a decomposition.
    pub fn snapshot(&self) -> Result<PeriodMetrics> {
        let component = |name: &str| {
            self.components.get(name).copied().flatten().ok_or_else(|| {
                MetricError::InvalidSnapshot(format!("north star component {} has no value", name))
            })
        };
        let vpac = self.value.ok_or_else(|| {
            MetricError::InvalidSnapshot(format!("{} has no value", self.metric))
        })?;
        Ok(PeriodMetrics {
            vpac,
            orders_per_customer: component("orders_per_customer")?,
            items_per_order: component("items_per_order")?,
        })
    }
}

/// One metric evaluated on two tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodComparison {
    pub metric: &'static str,
    pub display_name: &'static str,
    pub period1_value: Option<f64>,
    pub period2_value: Option<f64>,
    pub absolute_change: Option<f64>,
    /// Relative change; `0.0` when the period 1 value is zero.
    pub percent_change: Option<f64>,
    /// Classification of the period 2 value.
    pub status: MetricStatus,
}

/// Computes registered metrics from the user-level aggregate table.
///
/// Owns two caches: validated metric values by name, and the user-level
/// table fetched from the provider. Both live until [`clear_cache`].
///
/// [`clear_cache`]: MetricEngine::clear_cache
pub struct MetricEngine<P> {
    provider: P,
    registry: MetricRegistry,
    query: String,
    metric_cache: HashMap<String, Option<f64>>,
    user_table: Option<Table>,
}

impl<P: DataProvider> MetricEngine<P> {
    pub fn new(provider: P, registry: MetricRegistry) -> Self {
        Self {
            provider,
            registry,
            query: USER_KPI_QUERY.to_string(),
            metric_cache: HashMap::new(),
            user_table: None,
        }
    }

    /// Engine that requests the user-level table with the configured query.
    pub fn from_config(provider: P, registry: MetricRegistry, config: &Config) -> Self {
        Self::new(provider, registry).with_query(config.project.user_kpi_query.clone())
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// The user-level table, fetched on first use.
    pub fn user_table(&mut self) -> Result<&Table> {
        load_user_table(&mut self.user_table, &self.provider, &self.query)
    }

    /// Compute one metric. Errors propagate.
    pub fn compute(&mut self, name: &str, use_cache: bool) -> Result<Option<f64>> {
        let Self {
            provider,
            registry,
            query,
            metric_cache,
            user_table,
        } = self;
        let def = registry.get(name)?;
        let table = load_user_table(user_table, provider, query)?;
        evaluate(def, table, metric_cache, use_cache).map(|(value, _)| value)
    }

    /// Peek the metric cache. `None` when not cached or cached as null.
    pub fn get_cached_value(&self, name: &str) -> Option<f64> {
        self.metric_cache.get(name).copied().flatten()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.metric_cache.contains_key(name)
    }

    /// Compute every metric, split into (executive, diagnostic) layers.
    ///
    /// P0/P1 metrics go to the executive layer, P2/P3 to diagnostic. A metric
    /// that fails becomes an `ERROR` row in the diagnostic layer. Only a
    /// failure to fetch the user-level table propagates.
    pub fn compute_metrics_by_layer(&mut self) -> Result<(Vec<MetricRecord>, Vec<MetricRecord>)> {
        let Self {
            provider,
            registry,
            query,
            metric_cache,
            user_table,
        } = self;
        let table = load_user_table(user_table, provider, query)?;

        let mut executive = Vec::new();
        let mut diagnostic = Vec::new();
        let mut failed = 0usize;

        for def in registry.iter() {
            match evaluate(def, table, metric_cache, true) {
                Ok((value, status)) => {
                    let record = MetricRecord::new(def, value, status);
                    if def.is_executive() {
                        executive.push(record);
                    } else {
                        diagnostic.push(record);
                    }
                }
                Err(e) => {
                    warn!(metric = def.name, error = %e, "metric computation failed");
                    failed += 1;
                    diagnostic.push(MetricRecord::failed(def, &e));
                }
            }
        }

        info!(
            executive = executive.len(),
            diagnostic = diagnostic.len(),
            failed,
            "metric batch complete"
        );
        Ok((executive, diagnostic))
    }

    /// All metrics, executive rows first.
    pub fn compute_all_metrics(&mut self) -> Result<Vec<MetricRecord>> {
        let (mut executive, diagnostic) = self.compute_metrics_by_layer()?;
        executive.extend(diagnostic);
        Ok(executive)
    }

    /// [`compute_all_metrics`](Self::compute_all_metrics) as a [`Table`].
    pub fn metrics_table(&mut self) -> Result<Table> {
        Ok(records_to_table(&self.compute_all_metrics()?))
    }

    pub fn get_executive_summary(&mut self) -> Result<Vec<MetricRecord>> {
        Ok(self.compute_metrics_by_layer()?.0)
    }

    pub fn get_diagnostic_metrics(&mut self) -> Result<Vec<MetricRecord>> {
        Ok(self.compute_metrics_by_layer()?.1)
    }

    /// Metrics whose `owner_role` matches, case-insensitively.
    pub fn get_metrics_by_owner(&mut self, owner_role: &str) -> Result<Vec<MetricRecord>> {
        let mut records = self.compute_all_metrics()?;
        records.retain(|r| r.owner_role.eq_ignore_ascii_case(owner_role));
        Ok(records)
    }

    /// Plain-text report of both layers.
    pub fn get_metric_report(&mut self) -> Result<String> {
        let (executive, diagnostic) = self.compute_metrics_by_layer()?;
        Ok(report::render_metric_report(&executive, &diagnostic))
    }

    /// The North Star value and each of its dependencies.
    pub fn get_north_star(&mut self) -> Result<NorthStarBreakdown> {
        let ns = self.registry.north_star()?.clone();
        let value = self.compute(ns.name, true)?;

        let mut components = IndexMap::new();
        for dep in ns.dependencies {
            components.insert(*dep, self.compute(dep, true)?);
        }

        Ok(NorthStarBreakdown {
            metric: ns.name,
            display_name: ns.display_name,
            value,
            formula: ns.formula,
            components,
            unit: ns.unit,
            owner: ns.owner,
            tier: ns.tier,
        })
    }

    /// Drop cached metric values and the cached user-level table.
    pub fn clear_cache(&mut self) {
        let metrics = self.metric_cache.len();
        self.metric_cache.clear();
        self.user_table = None;
        info!(metrics, "cleared metric cache");
    }

    /// Evaluate metrics on two explicit tables, bypassing both caches.
    ///
    /// Values are classified without threshold validation so out-of-bound
    /// movements surface as `CRITICAL`. Metrics that fail on either table are
    /// logged and skipped.
    pub fn compare_periods(
        &self,
        period1: &Table,
        period2: &Table,
        name: Option<&str>,
    ) -> Result<Vec<PeriodComparison>> {
        let defs: Vec<&MetricDefinition> = match name {
            Some(n) => vec![self.registry.get(n)?],
            None => self.registry.iter().collect(),
        };

        let mut out = Vec::with_capacity(defs.len());
        for def in defs {
            let values = check_grain(def, period1)
                .and_then(|_| compute_value(def, period1))
                .and_then(|v1| {
                    check_grain(def, period2)?;
                    Ok((v1, compute_value(def, period2)?))
                });
            let (v1, v2) = match values {
                Ok(v) => v,
                Err(e) => {
                    warn!(metric = def.name, error = %e, "skipping metric in period comparison");
                    continue;
                }
            };

            let absolute_change = v1.zip(v2).map(|(a, b)| b - a);
            let percent_change = v1.zip(v2).map(|(a, b)| if a == 0.0 { 0.0 } else { b / a - 1.0 });
            out.push(PeriodComparison {
                metric: def.name,
                display_name: def.display_name,
                period1_value: v1,
                period2_value: v2,
                absolute_change,
                percent_change,
                status: def.status(v2),
            });
        }
        Ok(out)
    }
}

fn load_user_table<'a, P: DataProvider>(
    slot: &'a mut Option<Table>,
    provider: &P,
    query: &str,
) -> Result<&'a Table> {
    let table = match slot.take() {
        Some(table) => table,
        None => {
            let table = provider.execute(query)?;
            table.check_shape()?;
            info!(query, rows = table.row_count(), "fetched user-level table");
            check_orders_contract(&table);
            table
        }
    };
    Ok(slot.insert(table))
}

/// `orders_per_customer` must equal `orders` on every user row.
fn check_orders_contract(table: &Table) {
    let (Ok(opc), Ok(orders)) = (
        table.f64_column("orders_per_customer"),
        table.f64_column("orders"),
    ) else {
        debug!("orders columns unavailable, skipping contract check");
        return;
    };
    let divergent = opc.iter().zip(&orders).filter(|(a, b)| a != b).count();
    if divergent > 0 {
        warn!(
            divergent_rows = divergent,
            "orders_per_customer differs from orders in user-level table"
        );
    }
}

fn check_grain(def: &MetricDefinition, table: &Table) -> Result<()> {
    let mismatch = |reason: String| MetricError::GrainMismatch {
        metric: def.name.to_string(),
        expected: def.grain,
        reason,
    };
    match def.grain.key_column() {
        Some(key) if !table.has_column(key) => Err(mismatch(format!(
            "table has no {} column",
            key
        ))),
        Some(_) => Ok(()),
        None if table.is_empty() => Err(mismatch("table is empty".to_string())),
        None => Ok(()),
    }
}

/// Run the computation with empty-table, column and division rules applied.
fn compute_value(def: &MetricDefinition, table: &Table) -> Result<Option<f64>> {
    let rules = &def.validation_rules;
    if table.is_empty() {
        if rules.allow_empty {
            return Ok(Some(0.0));
        }
        return Err(MetricError::EmptyTable(def.name.to_string()));
    }

    let missing = table.missing_columns(rules.required_columns);
    if !missing.is_empty() {
        return Err(MetricError::MissingColumns {
            metric: def.name.to_string(),
            missing,
        });
    }

    match def.compute(table) {
        Ok(value) => Ok(value.filter(|v| v.is_finite())),
        Err(ComputeFault::DivisionByZero) => match rules.division_by_zero {
            DivisionByZero::ReturnZero => Ok(Some(0.0)),
            DivisionByZero::ReturnNull => Ok(None),
            DivisionByZero::Error => Err(MetricError::DivisionByZero(def.name.to_string())),
        },
        Err(ComputeFault::Table(e)) => Err(e.into()),
    }
}

/// Full per-metric pipeline: grain, cache, compute, validate, store.
fn evaluate(
    def: &MetricDefinition,
    table: &Table,
    cache: &mut HashMap<String, Option<f64>>,
    use_cache: bool,
) -> Result<(Option<f64>, MetricStatus)> {
    check_grain(def, table)?;

    if use_cache {
        if let Some(&value) = cache.get(def.name) {
            debug!(metric = def.name, "metric cache hit");
            return Ok((value, def.status(value)));
        }
    }

    let value = compute_value(def, table)?;
    let status = def.validate(value)?;
    debug!(metric = def.name, ?value, %status, "metric computed");
    cache.insert(def.name.to_string(), value);
    Ok((value, status))
}

impl From<MetricStatus> for Value {
    fn from(status: MetricStatus) -> Self {
        Value::Text(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MetricGrain, ValidationRules};
    use kpi_core::{KpiError, StaticProvider};

    fn user_table() -> Table {
        Table::with_rows(
            kpi_core::USER_KPI_COLUMNS.iter().copied(),
            vec![
                vec![1.into(), 2.into(), 10.into(), 2.into(), 5.0.into(), 0.5.into(), 0.0.into(), 7.0.into()],
                vec![2.into(), 4.into(), 16.into(), 4.into(), 4.0.into(), 0.25.into(), 0.25.into(), 10.0.into()],
            ],
        )
        .unwrap()
    }

    fn engine(table: Table) -> MetricEngine<StaticProvider> {
        MetricEngine::new(StaticProvider::with_user_table(table), MetricRegistry::standard())
    }

    #[test]
    fn compute_single_metric() {
        let mut e = engine(user_table());
        assert_eq!(e.compute("orders_per_customer", true).unwrap(), Some(3.0));
        assert_eq!(e.compute("active_customers", true).unwrap(), Some(2.0));
        assert_eq!(e.compute("total_items", true).unwrap(), Some(26.0));
    }

    #[test]
    fn compute_caches_validated_value() {
        let mut e = engine(user_table());
        assert!(!e.is_cached("vpac"));
        let v = e.compute("vpac", true).unwrap();
        assert_eq!(e.get_cached_value("vpac"), v);
        e.clear_cache();
        assert!(!e.is_cached("vpac"));
    }

    #[test]
    fn unknown_metric_propagates() {
        let mut e = engine(user_table());
        assert!(matches!(
            e.compute("gmv", true),
            Err(MetricError::UnknownMetric { .. })
        ));
    }

    #[test]
    fn grain_mismatch_without_user_id() {
        let table = Table::with_rows(
            ["orders", "orders_per_customer"],
            vec![vec![1.into(), 1.into()]],
        )
        .unwrap();
        let mut e = engine(table);
        assert!(matches!(
            e.compute("orders_per_customer", true),
            Err(MetricError::GrainMismatch { expected: MetricGrain::User, .. })
        ));
    }

    #[test]
    fn overall_grain_rejects_empty_table() {
        let mut e = engine(Table::new(kpi_core::USER_KPI_COLUMNS.iter().copied()));
        assert!(matches!(
            e.compute("total_orders", false),
            Err(MetricError::GrainMismatch { expected: MetricGrain::Overall, .. })
        ));
        assert!(matches!(
            e.compute("reorder_rate", false),
            Err(MetricError::EmptyTable(_))
        ));
    }

    #[test]
    fn missing_required_columns_listed() {
        let table = Table::with_rows(["user_id"], vec![vec![1.into()]]).unwrap();
        let mut e = engine(table);
        match e.compute("reorder_rate", false) {
            Err(MetricError::MissingColumns { missing, .. }) => {
                assert_eq!(missing, vec!["reorder_rate".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn batch_turns_failures_into_error_rows() {
        let mut t = user_table();
        // Push reorder_rate above its maximum.
        t.rows[0][5] = 3.0.into();
        let mut e = engine(t);
        let (executive, diagnostic) = e.compute_metrics_by_layer().unwrap();
        assert_eq!(executive.len(), 4);
        let reorder = diagnostic.iter().find(|r| r.name == "reorder_rate").unwrap();
        assert_eq!(reorder.status, MetricStatus::Error);
        assert_eq!(reorder.value, None);
        assert!(reorder.error.as_deref().unwrap().contains("above maximum"));
        assert!(!e.is_cached("reorder_rate"));
    }

    #[test]
    fn compute_all_orders_executive_first() {
        let mut e = engine(user_table());
        let records = e.compute_all_metrics().unwrap();
        assert_eq!(records.len(), 9);
        assert!(records[..4].iter().all(|r| r.tier.is_executive()));
        assert!(records[4..].iter().all(|r| !r.tier.is_executive()));

        let table = records_to_table(&records);
        assert_eq!(table.row_count(), 9);
        assert_eq!(table.columns.len(), METRIC_TABLE_COLUMNS.len());
        assert_eq!(table.get(0, "status"), Some(&Value::Text("OK".into())));
    }

    #[test]
    fn provider_failure_propagates_from_batch() {
        let mut e = MetricEngine::new(StaticProvider::new(), MetricRegistry::standard());
        assert!(matches!(
            e.compute_all_metrics(),
            Err(MetricError::Table(_))
        ));
    }

    #[test]
    fn north_star_breakdown() {
        let mut e = engine(user_table());
        let ns = e.get_north_star().unwrap();
        assert_eq!(ns.metric, "vpac");
        assert_eq!(ns.components.keys().copied().collect::<Vec<_>>(), vec!["orders_per_customer", "items_per_order"]);
        let snap = ns.snapshot().unwrap();
        assert!((snap.vpac - 3.0 * 4.5).abs() < 1e-12);
        assert_eq!(snap.items_per_order, 4.5);
    }

    #[test]
    fn owner_filter_is_case_insensitive() {
        let mut e = engine(user_table());
        let lifecycle = e.get_metrics_by_owner("lifecycle").unwrap();
        assert!(!lifecycle.is_empty());
        assert!(lifecycle.iter().all(|r| r.owner_role == "Lifecycle"));
    }

    #[test]
    fn compare_periods_reports_changes() {
        let e = engine(user_table());
        let p1 = user_table();
        let mut p2 = user_table();
        p2.rows[0][3] = 4.into();
        let rows = e.compare_periods(&p1, &p2, Some("orders_per_customer")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].period1_value, Some(3.0));
        assert_eq!(rows[0].period2_value, Some(4.0));
        assert_eq!(rows[0].absolute_change, Some(1.0));
        assert!((rows[0].percent_change.unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn compare_periods_classifies_out_of_bounds() {
        let e = engine(user_table());
        let mut p2 = user_table();
        p2.rows[0][5] = 3.0.into();
        let rows = e.compare_periods(&user_table(), &p2, Some("reorder_rate")).unwrap();
        assert_eq!(rows[0].status, MetricStatus::Critical);
    }

    #[test]
    fn compare_periods_unknown_name_fails() {
        let e = engine(user_table());
        assert!(e.compare_periods(&user_table(), &user_table(), Some("nope")).is_err());
    }

    fn divides_by_zero(_: &Table) -> std::result::Result<Option<f64>, ComputeFault> {
        Err(ComputeFault::DivisionByZero)
    }

    fn with_rules(division_by_zero: DivisionByZero, allow_empty: bool) -> MetricDefinition {
        let registry = MetricRegistry::standard();
        let base = registry.get("reorder_rate").unwrap().clone();
        MetricDefinition {
            computation: divides_by_zero,
            validation_rules: ValidationRules {
                allow_empty,
                division_by_zero,
                ..ValidationRules::STRICT
            },
            ..base
        }
    }

    #[test]
    fn allow_empty_yields_zero() {
        let def = with_rules(DivisionByZero::Error, true);
        let empty = Table::new(kpi_core::USER_KPI_COLUMNS.iter().copied());
        assert_eq!(compute_value(&def, &empty).unwrap(), Some(0.0));
    }

    #[test]
    fn division_by_zero_policies() {
        let table = user_table();
        assert_eq!(
            compute_value(&with_rules(DivisionByZero::ReturnZero, false), &table).unwrap(),
            Some(0.0)
        );
        assert_eq!(
            compute_value(&with_rules(DivisionByZero::ReturnNull, false), &table).unwrap(),
            None
        );
        assert!(matches!(
            compute_value(&with_rules(DivisionByZero::Error, false), &table),
            Err(MetricError::DivisionByZero(name)) if name == "reorder_rate"
        ));
    }

    #[test]
    fn malformed_provider_table_is_an_error() {
        let table = Table {
            columns: kpi_core::USER_KPI_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: vec![vec![1.into(), 2.into()]],
        };
        let mut e = engine(table);
        assert!(matches!(
            e.compute_all_metrics(),
            Err(MetricError::Table(KpiError::RowWidth { row: 0, found: 2, .. }))
        ));
        assert!(e.user_table().is_err());
    }
}
