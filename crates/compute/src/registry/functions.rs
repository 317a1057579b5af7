//! Metric computation functions over the user-level aggregate table.
//!
//! Each function is pure: it reads columns, aggregates, and returns a
//! nullable scalar. Averages over zero non-null rows report
//! [`ComputeFault::DivisionByZero`]; the engine maps that per metric.

use std::collections::HashSet;

use kpi_core::{KpiError, Table};

use crate::stats;

/// Failure inside a computation function, before metric rules apply.
#[derive(Debug, thiserror::Error)]
pub enum ComputeFault {
    #[error("division by zero")]
    DivisionByZero,

    #[error(transparent)]
    Table(#[from] KpiError),
}

type Computed = Result<Option<f64>, ComputeFault>;

fn non_null(table: &Table, column: &str) -> Result<Vec<f64>, ComputeFault> {
    Ok(table.f64_column(column)?.into_iter().flatten().collect())
}

fn column_mean(table: &Table, column: &str) -> Computed {
    let values = non_null(table, column)?;
    stats::mean(&values)
        .map(Some)
        .ok_or(ComputeFault::DivisionByZero)
}

/// SUM semantics: null when every input is null.
fn column_sum(table: &Table, column: &str) -> Computed {
    let values = non_null(table, column)?;
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(values.iter().sum()))
}

/// Count distinct non-null users.
pub fn compute_active_customers(table: &Table) -> Computed {
    let distinct: HashSet<String> = table
        .column("user_id")?
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect();
    Ok(Some(distinct.len() as f64))
}

pub fn compute_total_orders(table: &Table) -> Computed {
    column_sum(table, "orders")
}

pub fn compute_total_items(table: &Table) -> Computed {
    column_sum(table, "items")
}

/// Average orders per active customer (purchase frequency).
pub fn compute_orders_per_customer(table: &Table) -> Computed {
    column_mean(table, "orders_per_customer")
}

/// Average basket size, as the mean of per-user average basket sizes.
pub fn compute_items_per_order(table: &Table) -> Computed {
    column_mean(table, "avg_basket_size")
}

/// North Star: Orders per Customer × Items per Order.
pub fn compute_vpac(table: &Table) -> Computed {
    let orders_per_customer = compute_orders_per_customer(table)?;
    let items_per_order = compute_items_per_order(table)?;
    Ok(orders_per_customer
        .zip(items_per_order)
        .map(|(o, i)| o * i))
}

pub fn compute_reorder_rate(table: &Table) -> Computed {
    column_mean(table, "reorder_rate")
}

pub fn compute_small_basket_share(table: &Table) -> Computed {
    column_mean(table, "small_basket_share")
}

/// Median of per-user median gaps. Null when no user has a second order.
pub fn compute_median_days_since_prior(table: &Table) -> Computed {
    let values = non_null(table, "median_days_since_prior")?;
    Ok(stats::median(&values))
}
