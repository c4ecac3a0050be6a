//! The dashboard event loop.
//!
//! A single task owns the aggregator, the live tracker and the simulation
//! controller. It reacts to two kinds of events, store deliveries and clock
//! ticks, and each handler runs to completion before the next event is
//! taken, so no state needs a lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::geocode::{Geocoding, ReverseGeocoder};
use crate::metrics::{FleetMetrics, LoadFoldOptions, MetricsAggregator, Source};
use crate::model::{DriverRecord, LatLng, LoadRecord, ShipperRecord};
use crate::motion::{LiveTracker, SimulationConfig, SimulationController, SimulationFrame};
use crate::stream::{CollectionStore, Delivery, Query, Record, Subscription};

pub fn loads_query() -> Query {
    Query::collection("loads")
}

pub fn drivers_query() -> Query {
    Query::collection("drivers")
}

pub fn shippers_query() -> Query {
    Query::collection("users").where_eq("role", "shipper")
}

/// Event-loop timing.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub tick_interval: Duration,
    pub resubscribe_delay: Duration,
    pub fold: LoadFoldOptions,
    pub smoothing: chrono::TimeDelta,
}

impl From<&Settings> for RuntimeOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            resubscribe_delay: settings.resubscribe_delay,
            fold: LoadFoldOptions {
                delay_threshold: settings.delay_threshold,
            },
            smoothing: settings.smoothing,
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

enum SlotEvent<T> {
    Delivery(Delivery<T>),
    Ended,
    Retry,
}

/// One collection the loop listens to, re-subscribed after failures.
struct SourceSlot<T> {
    source: Source,
    query: Query,
    subscription: Option<Subscription<T>>,
    retry_at: Option<Instant>,
}

impl<T: Record> SourceSlot<T> {
    fn new(source: Source, query: Query) -> Self {
        Self {
            source,
            query,
            subscription: None,
            retry_at: None,
        }
    }

    fn subscribe<S: CollectionStore>(&mut self, store: &S) {
        debug!(source = %self.source, collection = %self.query.collection, "Subscribing");
        self.subscription = Some(store.subscribe(self.query.clone()));
        self.retry_at = None;
    }

    fn schedule_retry(&mut self, delay: Duration) {
        if let Some(mut sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.retry_at = Some(Instant::now() + delay);
    }

    /// Waits for this slot's next event. Cancel safe.
    async fn next(&mut self) -> SlotEvent<T> {
        match (&mut self.subscription, self.retry_at) {
            (Some(sub), _) => match sub.next().await {
                Some(delivery) => SlotEvent::Delivery(delivery),
                None => SlotEvent::Ended,
            },
            (None, Some(at)) => {
                tokio::time::sleep_until(at).await;
                SlotEvent::Retry
            }
            (None, None) => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        if let Some(mut sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.retry_at = None;
    }
}

#[derive(Default)]
struct LabelTable {
    labels: HashMap<String, String>,
    // sequence of the newest lookup issued per driver
    requested: HashMap<String, u64>,
    next_seq: u64,
}

/// Resolved addresses for live drivers, filled in by background lookups.
///
/// Each lookup is tagged with a sequence number and only the newest one for a
/// driver may store its result, so a slow answer for an old position never
/// replaces the label of a newer one.
#[derive(Clone, Default)]
pub struct DriverLabels {
    table: Arc<Mutex<LabelTable>>,
}

impl DriverLabels {
    pub fn get(&self, driver_id: &str) -> Option<String> {
        self.lock().labels.get(driver_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().labels.is_empty()
    }

    /// Registers a new lookup for `driver_id`, superseding any in flight.
    fn request(&self, driver_id: &str) -> u64 {
        let mut table = self.lock();
        table.next_seq += 1;
        let seq = table.next_seq;
        table.requested.insert(driver_id.to_string(), seq);
        seq
    }

    /// Stores `label` if `seq` is still the newest lookup for the driver.
    fn resolve(&self, driver_id: &str, seq: u64, label: String) -> bool {
        let mut table = self.lock();
        if table.requested.get(driver_id) != Some(&seq) {
            return false;
        }
        table.labels.insert(driver_id.to_string(), label);
        true
    }

    /// Forgets drivers missing from `present`, pending lookups included.
    fn retain(&self, present: &HashSet<&str>) -> usize {
        let mut table = self.lock();
        let before = table.labels.len();
        table.labels.retain(|id, _| present.contains(id.as_str()));
        table.requested.retain(|id, _| present.contains(id.as_str()));
        before - table.labels.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LabelTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wires a collection store to the metrics and motion components.
pub struct Dashboard<S> {
    store: S,
    options: RuntimeOptions,
    aggregator: MetricsAggregator,
    tracker: LiveTracker,
    simulation: SimulationController,
    geocoding: Option<Geocoding<Box<dyn ReverseGeocoder>>>,
    labels: DriverLabels,
}

impl<S: CollectionStore> Dashboard<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, options: RuntimeOptions) -> Self {
        Self {
            store,
            aggregator: MetricsAggregator::new(clock.clone(), options.fold),
            tracker: LiveTracker::new(clock.clone(), options.smoothing),
            simulation: SimulationController::new(clock),
            options,
            geocoding: None,
            labels: DriverLabels::default(),
        }
    }

    pub fn with_geocoding(mut self, geocoding: Geocoding<Box<dyn ReverseGeocoder>>) -> Self {
        self.geocoding = Some(geocoding);
        self
    }

    pub fn metrics(&self) -> watch::Receiver<FleetMetrics> {
        self.aggregator.subscribe()
    }

    pub fn frames(&self) -> watch::Receiver<SimulationFrame> {
        self.simulation.subscribe()
    }

    pub fn labels(&self) -> DriverLabels {
        self.labels.clone()
    }

    pub fn tracker(&self) -> &LiveTracker {
        &self.tracker
    }

    /// Starts a demo batch alongside live tracking.
    pub fn start_simulation(&mut self, configs: &[SimulationConfig]) -> usize {
        self.simulation.start(configs)
    }

    /// Runs until `shutdown` resolves, then releases every subscription.
    #[tracing::instrument(
        skip_all,
        fields(tick_ms = self.options.tick_interval.as_millis() as u64)
    )]
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut loads = SourceSlot::<LoadRecord>::new(Source::Loads, loads_query());
        let mut drivers = SourceSlot::<DriverRecord>::new(Source::Drivers, drivers_query());
        let mut shippers = SourceSlot::<ShipperRecord>::new(Source::Shippers, shippers_query());
        loads.subscribe(&self.store);
        drivers.subscribe(&self.store);
        shippers.subscribe(&self.store);

        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Dashboard running");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = loads.next() => {
                    if let Some(delivery) = self.settle(&mut loads, event) {
                        self.aggregator.apply_loads(delivery);
                    }
                }
                event = drivers.next() => {
                    if let Some(delivery) = self.settle(&mut drivers, event) {
                        self.on_drivers(delivery);
                    }
                }
                event = shippers.next() => {
                    if let Some(delivery) = self.settle(&mut shippers, event) {
                        self.aggregator.apply_shippers(delivery);
                    }
                }
                _ = ticker.tick() => self.on_tick(),
            }
        }

        loads.close();
        drivers.close();
        shippers.close();
        self.simulation.stop();
        info!("Dashboard stopped");
        Ok(())
    }

    /// Handles subscription lifecycle for a slot event; returns the delivery
    /// to fold, if any.
    fn settle<T: Record>(
        &mut self,
        slot: &mut SourceSlot<T>,
        event: SlotEvent<T>,
    ) -> Option<Delivery<T>> {
        match event {
            SlotEvent::Delivery(Delivery::Error(reason)) => {
                slot.schedule_retry(self.options.resubscribe_delay);
                Some(Delivery::Error(reason))
            }
            SlotEvent::Delivery(snapshot) => Some(snapshot),
            SlotEvent::Ended => {
                warn!(source = %slot.source, "Subscription ended without error");
                slot.schedule_retry(self.options.resubscribe_delay);
                Some(Delivery::Error("subscription ended".to_string()))
            }
            SlotEvent::Retry => {
                slot.subscribe(&self.store);
                None
            }
        }
    }

    fn on_drivers(&mut self, delivery: Delivery<DriverRecord>) {
        if let Delivery::Snapshot(drivers) = &delivery {
            let moved = self.tracker.observe(drivers);
            debug!(markers = self.tracker.len(), moved, "Driver markers updated");

            let present: HashSet<&str> = drivers.iter().filter_map(|d| d.id.as_deref()).collect();
            let evicted = self.labels.retain(&present);
            if evicted > 0 {
                debug!(evicted, "Dropped labels of departed drivers");
            }
            self.request_labels(drivers);
        }
        self.aggregator.apply_drivers(delivery);
    }

    fn on_tick(&mut self) {
        if let Some(geocoding) = &self.geocoding {
            let purged = geocoding.purge_expired();
            if purged > 0 {
                debug!(purged, "Expired geocoding entries purged");
            }
        }
        if self.simulation.active_runs() > 0 {
            let frame = self.simulation.tick();
            debug!(progress = frame.progress, "Simulation tick");
        }
    }

    /// Fire-and-forget address lookups; results land in [`Dashboard::labels`].
    fn request_labels(&self, drivers: &[DriverRecord]) {
        let Some(geocoding) = &self.geocoding else {
            return;
        };
        for driver in drivers {
            let (Some(id), Some(pos)) = (&driver.id, driver.position) else {
                continue;
            };
            let seq = self.labels.request(id);
            spawn_label(geocoding.clone(), self.labels.clone(), id.clone(), seq, pos);
        }
    }
}

fn spawn_label(
    geocoding: Geocoding<Box<dyn ReverseGeocoder>>,
    labels: DriverLabels,
    driver_id: String,
    seq: u64,
    pos: LatLng,
) {
    tokio::spawn(async move {
        let label = geocoding.label_for(pos).await;
        if !labels.resolve(&driver_id, seq, label) {
            debug!(driver_id = %driver_id, seq, "Discarded superseded address lookup");
        }
    });
}
