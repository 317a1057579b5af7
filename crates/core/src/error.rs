use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column {column} holds non-numeric value {value:?} at row {row}")]
    TypeMismatch {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Row {row} has {found} cells, table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Data provider error: {0}")]
    Provider(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, KpiError>;
