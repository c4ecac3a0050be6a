//! Data types published by the metrics aggregator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

/// Load counts per status. `total` includes loads whose status could not be
/// classified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub pending: usize,
    pub delivered: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl StatusCounts {
    /// Sum of the named buckets; never exceeds `total`.
    pub fn classified(&self) -> usize {
        self.active + self.pending + self.delivered + self.cancelled
    }
}

/// Loads created on one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub loads: usize,
    pub revenue: f64,
}

/// Everything the dashboard derives from the `loads` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub status: StatusCounts,
    pub revenue: f64,
    pub average_rate: f64,
    pub average_fuel_efficiency: f64,
    pub active_loads: usize,
    pub delivered_loads: usize,
    pub in_transit_loads: usize,
    pub delayed_loads: usize,
    /// At most seven days, oldest first.
    pub daily: Vec<DailyBucket>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverMetrics {
    pub total: usize,
    pub pickup: usize,
    pub in_transit: usize,
    pub accomplished: usize,
    pub breakdown: usize,
    pub on_assignment: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShipperMetrics {
    pub total: usize,
    pub last_updated: DateTime<Utc>,
}

/// The collections feeding the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Loads,
    Drivers,
    Shippers,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Loads => "loads",
            Source::Drivers => "drivers",
            Source::Shippers => "shippers",
        })
    }
}

/// Liveness of one source. `Degraded` sticks until the next snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SourceHealth {
    #[default]
    Waiting,
    Live,
    Degraded(String),
}

impl SourceHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SourceHealth::Degraded(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthBySource {
    pub loads: SourceHealth,
    pub drivers: SourceHealth,
    pub shippers: SourceHealth,
}

impl HealthBySource {
    pub fn get(&self, source: Source) -> &SourceHealth {
        match source {
            Source::Loads => &self.loads,
            Source::Drivers => &self.drivers,
            Source::Shippers => &self.shippers,
        }
    }

    pub(crate) fn get_mut(&mut self, source: Source) -> &mut SourceHealth {
        match source {
            Source::Loads => &mut self.loads,
            Source::Drivers => &mut self.drivers,
            Source::Shippers => &mut self.shippers,
        }
    }
}

/// The complete state read by dashboard cards.
///
/// Each slice starts zeroed and is replaced wholesale when its source
/// delivers a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetMetrics {
    pub loads: DerivedMetrics,
    pub drivers: DriverMetrics,
    pub shippers: ShipperMetrics,
    pub health: HealthBySource,
}

impl FleetMetrics {
    /// Drivers plus shippers.
    pub fn total_users(&self) -> usize {
        self.drivers.total + self.shippers.total
    }

    /// Whether any source is serving stale data.
    pub fn is_degraded(&self) -> bool {
        [Source::Loads, Source::Drivers, Source::Shippers]
            .into_iter()
            .any(|s| self.health.get(s).is_degraded())
    }
}
