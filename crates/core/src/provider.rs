//! The data provider seam: the one capability the metric core consumes.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{KpiError, Result};
use crate::table::Table;

/// Query used to request the user-level aggregate table (one row per customer).
pub const USER_KPI_QUERY: &str = "kpi_user_aggregates";

/// Columns the user-level aggregate table must carry.
pub const USER_KPI_COLUMNS: &[&str] = &[
    "user_id",
    "orders",
    "items",
    "orders_per_customer",
    "avg_basket_size",
    "reorder_rate",
    "small_basket_share",
    "median_days_since_prior",
];

/// Executes a query-like request against tabular data.
///
/// Implementations decide how the table is produced (file read, database
/// join, cached materialization); callers only rely on schema and grain.
pub trait DataProvider {
    fn execute(&self, query: &str) -> Result<Table>;
}

impl<P: DataProvider + ?Sized> DataProvider for &P {
    fn execute(&self, query: &str) -> Result<Table> {
        (**self).execute(query)
    }
}

impl<P: DataProvider + ?Sized> DataProvider for Box<P> {
    fn execute(&self, query: &str) -> Result<Table> {
        (**self).execute(query)
    }
}

/// Provider backed by pre-materialized tables keyed by query text.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    tables: HashMap<String, Table>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider answering [`USER_KPI_QUERY`] with `table`.
    pub fn with_user_table(table: Table) -> Self {
        let mut provider = Self::new();
        provider.register(USER_KPI_QUERY, table);
        provider
    }

    /// Register (or replace) the table returned for `query`.
    pub fn register(&mut self, query: impl Into<String>, table: Table) {
        self.tables.insert(query.into(), table);
    }
}

impl DataProvider for StaticProvider {
    fn execute(&self, query: &str) -> Result<Table> {
        debug!(query, "serving materialized table");
        self.tables
            .get(query)
            .cloned()
            .ok_or_else(|| KpiError::Provider(format!("no table registered for query {:?}", query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_registered_table() {
        let table = Table::new(USER_KPI_COLUMNS.iter().copied());
        let provider = StaticProvider::with_user_table(table.clone());
        assert_eq!(provider.execute(USER_KPI_QUERY).unwrap(), table);
    }

    #[test]
    fn unknown_query_is_provider_error() {
        let provider = StaticProvider::new();
        assert!(matches!(
            provider.execute("select 1"),
            Err(KpiError::Provider(_))
        ));
    }

    #[test]
    fn references_and_boxes_are_providers() {
        let provider = StaticProvider::with_user_table(Table::new(["user_id"]));
        let by_ref: &dyn DataProvider = &provider;
        assert!(by_ref.execute(USER_KPI_QUERY).is_ok());
        let boxed: Box<dyn DataProvider> = Box::new(provider);
        assert!(boxed.execute(USER_KPI_QUERY).is_ok());
    }
}
