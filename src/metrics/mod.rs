//! Live dashboard metrics.
//!
//! Each store snapshot is folded from scratch into its slice of
//! [`FleetMetrics`]; nothing is updated incrementally, so a published value
//! never mixes fields from two different snapshots.

pub mod aggregator;
pub mod fold;
pub mod types;
pub mod utility;

pub use aggregator::MetricsAggregator;
pub use fold::{DEFAULT_FUEL_EFFICIENCY, LoadFoldOptions, fold_loads, load_revenue};
pub use types::{
    DailyBucket, DerivedMetrics, DriverMetrics, FleetMetrics, HealthBySource, ShipperMetrics,
    Source, SourceHealth, StatusCounts,
};
