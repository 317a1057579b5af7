//! KPI computation: metric registry, engine, decomposition, segmentation and
//! data quality checks over the user-level aggregate table.

pub mod decompose;
pub mod engine;
pub mod error;
pub mod quality;
pub mod registry;
pub mod report;
pub mod segment;
pub mod stats;

pub use decompose::{
    create_waterfall_data, validate_decomposition, Decomposer, DecompositionResult, PeriodMetrics,
    WaterfallStep,
};
pub use engine::{records_to_table, MetricEngine, MetricRecord, NorthStarBreakdown, PeriodComparison};
pub use error::{MetricError, Result};
pub use quality::{detect_outliers, CheckSeverity, DataQualityChecker, OutlierMethod, QualityCheckResult};
pub use registry::{MetricDefinition, MetricGrain, MetricRegistry, MetricStatus, MetricTier, MetricType};
pub use segment::{segment_by_basket_size, segment_by_order_frequency, segments_to_table, SegmentSummary};
