use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::metrics::fold::{LoadFoldOptions, fold_drivers, fold_loads, fold_shippers};
use crate::metrics::types::{FleetMetrics, Source, SourceHealth};
use crate::model::{DriverRecord, LoadRecord, ShipperRecord};
use crate::stream::Delivery;

/// Owns [`FleetMetrics`] and rebuilds one slice per incoming snapshot.
///
/// Only the aggregator's own handlers mutate the state; readers get
/// clones through [`MetricsAggregator::subscribe`].
pub struct MetricsAggregator {
    clock: Arc<dyn Clock>,
    options: LoadFoldOptions,
    state: FleetMetrics,
    tx: watch::Sender<FleetMetrics>,
}

impl MetricsAggregator {
    pub fn new(clock: Arc<dyn Clock>, options: LoadFoldOptions) -> Self {
        let state = FleetMetrics::default();
        let (tx, _) = watch::channel(state.clone());
        Self {
            clock,
            options,
            state,
            tx,
        }
    }

    /// A read-only view that changes every time a slice is replaced.
    pub fn subscribe(&self) -> watch::Receiver<FleetMetrics> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> &FleetMetrics {
        &self.state
    }

    pub fn on_loads_snapshot(&mut self, loads: &[LoadRecord]) -> &FleetMetrics {
        let now = stamp(self.clock.now(), self.state.loads.last_updated);
        let metrics = fold_loads(loads, now, &self.options);
        debug!(
            total = metrics.status.total,
            classified = metrics.status.classified(),
            revenue = metrics.revenue,
            "Loads snapshot folded"
        );

        self.state.loads = metrics;
        self.mark_live(Source::Loads);
        self.publish()
    }

    pub fn on_drivers_snapshot(&mut self, drivers: &[DriverRecord]) -> &FleetMetrics {
        let now = stamp(self.clock.now(), self.state.drivers.last_updated);
        let metrics = fold_drivers(drivers, now);
        debug!(total = metrics.total, "Drivers snapshot folded");

        self.state.drivers = metrics;
        self.mark_live(Source::Drivers);
        self.publish()
    }

    pub fn on_shippers_snapshot(&mut self, shippers: &[ShipperRecord]) -> &FleetMetrics {
        let now = stamp(self.clock.now(), self.state.shippers.last_updated);
        self.state.shippers = fold_shippers(shippers, now);
        debug!(total = shippers.len(), "Shippers snapshot folded");

        self.mark_live(Source::Shippers);
        self.publish()
    }

    /// Flags `source` as degraded. Its last metrics stay in place.
    pub fn on_source_error(&mut self, source: Source, reason: &str) -> &FleetMetrics {
        warn!(%source, reason, "Source degraded, serving last known metrics");
        *self.state.health.get_mut(source) = SourceHealth::Degraded(reason.to_string());
        self.publish()
    }

    pub fn apply_loads(&mut self, delivery: Delivery<LoadRecord>) -> &FleetMetrics {
        match delivery {
            Delivery::Snapshot(loads) => self.on_loads_snapshot(&loads),
            Delivery::Error(reason) => self.on_source_error(Source::Loads, &reason),
        }
    }

    pub fn apply_drivers(&mut self, delivery: Delivery<DriverRecord>) -> &FleetMetrics {
        match delivery {
            Delivery::Snapshot(drivers) => self.on_drivers_snapshot(&drivers),
            Delivery::Error(reason) => self.on_source_error(Source::Drivers, &reason),
        }
    }

    pub fn apply_shippers(&mut self, delivery: Delivery<ShipperRecord>) -> &FleetMetrics {
        match delivery {
            Delivery::Snapshot(shippers) => self.on_shippers_snapshot(&shippers),
            Delivery::Error(reason) => self.on_source_error(Source::Shippers, &reason),
        }
    }

    fn mark_live(&mut self, source: Source) {
        let health = self.state.health.get_mut(source);
        if health.is_degraded() {
            info!(%source, "Source recovered");
        }
        *health = SourceHealth::Live;
    }

    fn publish(&self) -> &FleetMetrics {
        self.tx.send_replace(self.state.clone());
        &self.state
    }
}

/// Keeps `last_updated` from moving backwards if the clock does.
fn stamp(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous)
}
