//! Output formatting and persistence for dashboard metrics.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::metrics::FleetMetrics;
use crate::metrics::utility::pct;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One flat CSV row summarising a [`FleetMetrics`] value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRow {
    pub timestamp: DateTime<Utc>,
    pub total_loads: usize,
    pub active_loads: usize,
    pub pending_loads: usize,
    pub delivered_loads: usize,
    pub cancelled_loads: usize,
    pub in_transit_loads: usize,
    pub delayed_loads: usize,
    pub delivered_pct: f64,
    pub revenue: f64,
    pub average_rate: f64,
    pub average_fuel_efficiency: f64,
    pub total_drivers: usize,
    pub drivers_on_assignment: usize,
    pub drivers_breakdown: usize,
    pub total_shippers: usize,
    pub total_users: usize,
    pub degraded: bool,
}

impl MetricsRow {
    pub fn from_metrics(metrics: &FleetMetrics, timestamp: DateTime<Utc>) -> Self {
        let loads = &metrics.loads;
        Self {
            timestamp,
            total_loads: loads.status.total,
            active_loads: loads.status.active,
            pending_loads: loads.status.pending,
            delivered_loads: loads.status.delivered,
            cancelled_loads: loads.status.cancelled,
            in_transit_loads: loads.in_transit_loads,
            delayed_loads: loads.delayed_loads,
            delivered_pct: pct(loads.status.delivered, loads.status.total),
            revenue: loads.revenue,
            average_rate: loads.average_rate,
            average_fuel_efficiency: loads.average_fuel_efficiency,
            total_drivers: metrics.drivers.total,
            drivers_on_assignment: metrics.drivers.on_assignment,
            drivers_breakdown: metrics.drivers.breakdown,
            total_shippers: metrics.shippers.total,
            total_users: metrics.total_users(),
            degraded: metrics.is_degraded(),
        }
    }
}

/// Logs metrics using Rust's debug pretty-print format.
pub fn print_pretty(metrics: &FleetMetrics) {
    debug!("{:#?}", metrics);
}

/// Logs metrics as pretty-printed JSON.
pub fn print_json(metrics: &FleetMetrics) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(metrics)?);
    Ok(())
}

/// One structured log line with the headline numbers.
pub fn log_summary(metrics: &FleetMetrics) {
    let loads = &metrics.loads;
    info!(
        loads = loads.status.total,
        active = loads.status.active,
        in_transit = loads.in_transit_loads,
        delayed = loads.delayed_loads,
        revenue = loads.revenue,
        drivers = metrics.drivers.total,
        shippers = metrics.shippers.total,
        degraded = metrics.is_degraded(),
        "Fleet metrics"
    );
}

/// Appends a [`MetricsRow`] to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, row: &MetricsRow) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(row)?;
    writer.flush()?;

    Ok(())
}
