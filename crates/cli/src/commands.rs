use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use kpi_compute::decompose::create_waterfall_data;
use kpi_compute::{
    detect_outliers, records_to_table, report, segment_by_basket_size,
    segment_by_order_frequency, segments_to_table, DataQualityChecker, Decomposer, MetricEngine,
    MetricRegistry, OutlierMethod, PeriodComparison, PeriodMetrics,
};
use kpi_core::{Config, DataProvider, StaticProvider, Table, Value};

use crate::cli::{Method, SegmentBy};
use crate::input::{read_table, FileProvider};

/// The user-level table from `path`, or from the data directory.
fn load_users(config: &Config, path: Option<&Path>) -> Result<Table> {
    match path {
        Some(p) => read_table(p),
        None => {
            let provider = FileProvider::new(&config.project.data_dir);
            provider
                .execute(&config.project.user_kpi_query)
                .with_context(|| {
                    format!(
                        "failed to load {} from {}",
                        config.project.user_kpi_query,
                        config.project.data_dir.display()
                    )
                })
        }
    }
}

fn engine_for(config: &Config, users: Table) -> MetricEngine<StaticProvider> {
    let mut provider = StaticProvider::new();
    provider.register(config.project.user_kpi_query.clone(), users);
    MetricEngine::from_config(provider, MetricRegistry::standard(), config)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

pub fn metrics(
    config: &Config,
    users: Option<&Path>,
    owner: Option<&str>,
    compare: Option<&Path>,
    metric: Option<&str>,
    json: bool,
) -> Result<String> {
    let table = load_users(config, users)?;

    if let Some(path) = compare {
        let period2 = read_table(path)?;
        let engine = engine_for(config, Table::default());
        let rows = engine.compare_periods(&table, &period2, metric)?;
        info!(metrics = rows.len(), "compared periods");
        return if json {
            to_json(&rows)
        } else {
            Ok(comparison_table(&rows).to_string())
        };
    }

    let mut engine = engine_for(config, table);
    match (owner, json) {
        (Some(role), true) => to_json(&engine.get_metrics_by_owner(role)?),
        (Some(role), false) => Ok(records_to_table(&engine.get_metrics_by_owner(role)?).to_string()),
        (None, true) => to_json(&engine.compute_all_metrics()?),
        (None, false) => Ok(engine.get_metric_report()?),
    }
}

fn comparison_table(rows: &[PeriodComparison]) -> Table {
    Table {
        columns: ["metric", "period1", "period2", "change", "percent_change", "status"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    r.display_name.into(),
                    r.period1_value.into(),
                    r.period2_value.into(),
                    r.absolute_change.into(),
                    r.percent_change.into(),
                    Value::Text(r.status.to_string()),
                ]
            })
            .collect(),
    }
}

pub fn segments(config: &Config, users: Option<&Path>, by: SegmentBy, json: bool) -> Result<String> {
    let table = load_users(config, users)?;
    let summaries = match by {
        SegmentBy::Frequency => segment_by_order_frequency(&table)?,
        SegmentBy::Basket => segment_by_basket_size(&table)?,
    };
    if json {
        to_json(&summaries)
    } else {
        Ok(segments_to_table(&summaries).to_string())
    }
}

fn snapshot(config: &Config, path: &Path) -> Result<PeriodMetrics> {
    let mut engine = engine_for(config, read_table(path)?);
    let north_star = engine
        .get_north_star()
        .with_context(|| format!("failed to compute north star for {}", path.display()))?;
    Ok(north_star.snapshot()?)
}

pub fn decompose(
    config: &Config,
    period1: &Path,
    period2: &Path,
    label1: &str,
    label2: &str,
    json: bool,
) -> Result<String> {
    let p1 = snapshot(config, period1)?;
    let p2 = snapshot(config, period2)?;

    let mut decomposer = Decomposer::from_config(&config.metrics);
    let result = decomposer.decompose_vpac_change(&p1, &p2, label1, label2);
    decomposer
        .validate(&result)
        .context("decomposition does not reconcile")?;
    let waterfall = create_waterfall_data(&result);

    if json {
        return to_json(&json!({ "decomposition": result, "waterfall": waterfall }));
    }

    let steps = Table {
        columns: vec!["step".into(), "value".into(), "cumulative".into()],
        rows: waterfall
            .iter()
            .map(|s| vec![s.step.as_str().into(), s.value.into(), s.cumulative.into()])
            .collect(),
    };
    Ok(format!("{}\n\n{}", report::render_decomposition(&result), steps))
}

pub fn quality(
    config: &Config,
    users: Option<&Path>,
    outliers: Option<&str>,
    method: Method,
    threshold: Option<f64>,
    json: bool,
) -> Result<String> {
    let table = load_users(config, users)?;
    let name = users
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.project.user_kpi_query.clone());

    let mut checker = DataQualityChecker::from_config(&config.metrics);
    checker.run_all_checks(&table, &name);
    if table.has_column("orders") && table.has_column("orders_per_customer") {
        let result = checker.check_column_equality(&table, "orders_per_customer", "orders")?;
        checker.record(result);
    }
    checker.check_configured_relationships(&table)?;

    let flagged = match outliers {
        Some(column) => {
            let values: Vec<f64> = table.f64_column(column)?.into_iter().flatten().collect();
            let method = match method {
                Method::Zscore => OutlierMethod::Zscore,
                Method::Iqr => OutlierMethod::Iqr,
            };
            let threshold = threshold.unwrap_or(config.metrics.anomaly_z_threshold);
            Some((column, detect_outliers(&values, method, threshold)))
        }
        None => None,
    };

    if json {
        return to_json(&json!({
            "config": config.redacted_summary(),
            "passed": !checker.has_errors(),
            "results": checker.results(),
            "outliers": flagged.as_ref().map(|(column, idx)| json!({ "column": column, "indices": idx })),
        }));
    }

    let mut out = checker.summary_report();
    if let Some((column, idx)) = flagged {
        out.push_str(&format!(
            "\n\nOutliers in '{}': {} of {} non-null values",
            column,
            idx.len(),
            table.f64_column(column)?.iter().flatten().count()
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use kpi_core::USER_KPI_COLUMNS;

    /// Two customers with two orders each and the given basket sizes.
    fn write_week(dir: &Path, name: &str, baskets: [f64; 2]) -> PathBuf {
        let rows: Vec<Vec<Value>> = baskets
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                vec![
                    Value::Integer(i as i64 + 1),
                    Value::Integer(2),
                    Value::Float(2.0 * b),
                    Value::Integer(2),
                    Value::Float(b),
                    Value::Float(0.5),
                    Value::Float(0.0),
                    Value::Float(7.0),
                ]
            })
            .collect();
        let table = Table::with_rows(USER_KPI_COLUMNS.iter().copied(), rows).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(&table).unwrap()).unwrap();
        path
    }

    #[test]
    fn decompose_attributes_basket_growth() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_week(dir.path(), "w1.json", [4.0, 6.0]);
        let p2 = write_week(dir.path(), "w2.json", [5.0, 7.0]);
        let config = Config::load(None).unwrap();

        let out = decompose(&config, &p1, &p2, "W1", "W2", true).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        let total = doc["decomposition"]["total_change"].as_f64().unwrap();
        assert!((total - 2.0).abs() < 1e-9);
        assert_eq!(doc["waterfall"].as_array().unwrap().len(), 4);

        let text = decompose(&config, &p1, &p2, "W1", "W2", false).unwrap();
        assert!(text.contains("Total Change: +2.00 (+20.0%)"));
        assert!(text.contains("items_per_order: +2.00"));
    }

    #[test]
    fn decompose_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_week(dir.path(), "w1.json", [4.0, 6.0]);
        let config = Config::load(None).unwrap();
        let err = decompose(&config, &p1, &dir.path().join("absent.json"), "W1", "W2", false)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("absent.json"));
    }
}
