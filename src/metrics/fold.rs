//! Pure folds from a full snapshot to its derived metrics.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::collections::BTreeMap;

use crate::metrics::types::{
    DailyBucket, DerivedMetrics, DriverMetrics, ShipperMetrics, StatusCounts,
};
use crate::metrics::utility::average;
use crate::model::{DriverRecord, DriverStatus, LoadRecord, LoadStatus, ShipperRecord};

/// Fuel efficiency (mpg) assumed for loads that do not report one.
pub const DEFAULT_FUEL_EFFICIENCY: f64 = 7.0;

/// Days kept in the trailing histogram.
pub const HISTOGRAM_DAYS: usize = 7;

/// Tunables for [`fold_loads`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadFoldOptions {
    /// Active or in-transit loads older than this count as delayed.
    pub delay_threshold: TimeDelta,
}

impl Default for LoadFoldOptions {
    fn default() -> Self {
        Self {
            delay_threshold: TimeDelta::hours(48),
        }
    }
}

/// Revenue contributed by one load.
///
/// Rate-per-mile times distance wins over the flat rate; `None` when the
/// load carries neither.
pub fn load_revenue(load: &LoadRecord) -> Option<f64> {
    match (load.rate_per_mile, load.distance, load.rate) {
        (Some(per_mile), Some(distance), _) => Some(per_mile * distance),
        (_, _, Some(rate)) => Some(rate),
        _ => None,
    }
}

/// Folds a loads snapshot into a fresh [`DerivedMetrics`] stamped `now`.
///
/// Malformed loads count toward `status.total` and the fuel average only.
pub fn fold_loads(
    loads: &[LoadRecord],
    now: DateTime<Utc>,
    options: &LoadFoldOptions,
) -> DerivedMetrics {
    let mut m = DerivedMetrics {
        last_updated: now,
        ..Default::default()
    };
    m.status.total = loads.len();

    let mut priced = 0usize;
    let mut fuel_sum = 0.0;
    let mut fuel_count = 0usize;
    let mut days: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();

    for load in loads {
        fuel_sum += load.fuel_efficiency.unwrap_or(DEFAULT_FUEL_EFFICIENCY);
        fuel_count += 1;

        if load.is_malformed() {
            continue;
        }

        let status = load.status.unwrap_or(LoadStatus::Unknown);
        classify(&mut m.status, status);

        match status {
            LoadStatus::Active => m.active_loads += 1,
            LoadStatus::Delivered => m.delivered_loads += 1,
            LoadStatus::InTransit => m.in_transit_loads += 1,
            _ => {}
        }

        let revenue = load_revenue(load);
        if let Some(r) = revenue {
            m.revenue += r;
            priced += 1;
        }

        if let Some(created) = load.created_at {
            if matches!(status, LoadStatus::Active | LoadStatus::InTransit)
                && now - created > options.delay_threshold
            {
                m.delayed_loads += 1;
            }

            let day = days.entry(created.date_naive()).or_default();
            day.0 += 1;
            day.1 += revenue.unwrap_or(0.0);
        }
    }

    m.average_rate = average(m.revenue, priced);
    m.average_fuel_efficiency = average(fuel_sum, fuel_count);

    let skip = days.len().saturating_sub(HISTOGRAM_DAYS);
    m.daily = days
        .into_iter()
        .skip(skip)
        .map(|(date, (loads, revenue))| DailyBucket { date, loads, revenue })
        .collect();

    m
}

fn classify(counts: &mut StatusCounts, status: LoadStatus) {
    match status {
        LoadStatus::Active => counts.active += 1,
        LoadStatus::Pending => counts.pending += 1,
        LoadStatus::Delivered => counts.delivered += 1,
        LoadStatus::Cancelled => counts.cancelled += 1,
        LoadStatus::InTransit | LoadStatus::Unknown => {}
    }
}

pub fn fold_drivers(drivers: &[DriverRecord], now: DateTime<Utc>) -> DriverMetrics {
    let mut m = DriverMetrics {
        total: drivers.len(),
        last_updated: now,
        ..Default::default()
    };

    for driver in drivers.iter().filter(|d| !d.is_malformed()) {
        match driver.status {
            Some(DriverStatus::Pickup) => m.pickup += 1,
            Some(DriverStatus::InTransit) => m.in_transit += 1,
            Some(DriverStatus::Accomplished) => m.accomplished += 1,
            Some(DriverStatus::Breakdown) => m.breakdown += 1,
            Some(DriverStatus::Unknown) | None => {}
        }
        if driver.load_id.is_some() {
            m.on_assignment += 1;
        }
    }

    m
}

pub fn fold_shippers(shippers: &[ShipperRecord], now: DateTime<Utc>) -> ShipperMetrics {
    ShipperMetrics {
        total: shippers.len(),
        last_updated: now,
    }
}
