pub mod config;
pub mod error;
pub mod provider;
pub mod table;

pub use config::Config;
pub use error::*;
pub use provider::{DataProvider, StaticProvider, USER_KPI_COLUMNS, USER_KPI_QUERY};
pub use table::{Table, Value};
