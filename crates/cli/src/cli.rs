use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// KPI reporting for order datasets.
///
/// Reads user-level aggregate tables as JSON (`{"columns": [...], "rows": [[...]]}`)
/// and prints metric, segment, decomposition and data quality reports.
#[derive(Parser, Debug)]
#[command(name = "kpi", about = "Compute, decompose and check order KPIs")]
pub struct CliArgs {
    /// YAML overlay applied on top of environment configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute every registered metric
    Metrics {
        /// User-level table (default: `<data_dir>/<user query>.json`)
        #[arg(long)]
        users: Option<PathBuf>,

        /// Only metrics owned by this role
        #[arg(long)]
        owner: Option<String>,

        /// Compare against a second user-level table
        #[arg(long)]
        compare: Option<PathBuf>,

        /// Restrict the comparison to one metric
        #[arg(long, requires = "compare")]
        metric: Option<String>,
    },

    /// Segment customers
    Segments {
        #[arg(long)]
        users: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "frequency")]
        by: SegmentBy,
    },

    /// Attribute the North Star change between two periods
    Decompose {
        /// User-level table for the first period
        period1: PathBuf,

        /// User-level table for the second period
        period2: PathBuf,

        #[arg(long, default_value = "Period 1")]
        label1: String,

        #[arg(long, default_value = "Period 2")]
        label2: String,
    },

    /// Run data quality checks
    Quality {
        #[arg(long)]
        users: Option<PathBuf>,

        /// Also flag outliers in this column
        #[arg(long)]
        outliers: Option<String>,

        #[arg(long, value_enum, default_value = "zscore")]
        method: Method,

        /// Outlier threshold (default: configured anomaly z threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SegmentBy {
    Frequency,
    Basket,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Method {
    Zscore,
    Iqr,
}
