use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use kpi_core::{DataProvider, KpiError, Table};

/// Read a JSON table from disk.
pub fn read_table(path: &Path) -> Result<Table> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let table = Table::from_json(&json)
        .with_context(|| format!("failed to parse table in {}", path.display()))?;
    debug!(path = %path.display(), rows = table.row_count(), "loaded table");
    Ok(table)
}

/// Answers a query with `<dir>/<query>.json`.
pub struct FileProvider {
    dir: PathBuf,
}

impl FileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, query: &str) -> PathBuf {
        self.dir.join(format!("{}.json", query))
    }
}

impl DataProvider for FileProvider {
    fn execute(&self, query: &str) -> kpi_core::Result<Table> {
        let path = self.path_for(query);
        let json = std::fs::read_to_string(&path)
            .map_err(|e| KpiError::Provider(format!("{}: {}", path.display(), e)))?;
        Table::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpi_core::Value;

    fn table() -> Table {
        Table::with_rows(
            ["user_id", "orders"],
            vec![vec![1.into(), 3.into()], vec![2.into(), Value::Null]],
        )
        .unwrap()
    }

    #[test]
    fn file_provider_reads_query_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("user_kpis.json"),
            serde_json::to_string(&table()).unwrap(),
        )
        .unwrap();

        let provider = FileProvider::new(dir.path());
        assert_eq!(provider.execute("user_kpis").unwrap(), table());
        assert!(matches!(
            provider.execute("weekly_users"),
            Err(KpiError::Provider(_))
        ));
    }

    #[test]
    fn read_table_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"columns": ["a", "b"], "rows": [[1]]}"#).unwrap();
        assert!(read_table(&path).is_err());
    }
}
