use std::collections::HashMap;
use std::sync::Arc;

use chrono::TimeDelta;

use crate::clock::Clock;
use crate::model::{DriverRecord, LatLng};
use crate::motion::interpolator::{InterpolationRun, RunIds};

/// Smooths live driver markers: a reported move glides from wherever the
/// marker is shown to the new position instead of jumping.
pub struct LiveTracker {
    clock: Arc<dyn Clock>,
    ids: RunIds,
    smoothing: TimeDelta,
    markers: HashMap<String, InterpolationRun>,
}

impl LiveTracker {
    pub fn new(clock: Arc<dyn Clock>, smoothing: TimeDelta) -> Self {
        Self {
            clock,
            ids: RunIds::default(),
            smoothing,
            markers: HashMap::new(),
        }
    }

    /// Folds in a drivers snapshot. Drivers missing from it lose their marker.
    /// Returns how many markers started moving.
    pub fn observe(&mut self, drivers: &[DriverRecord]) -> usize {
        let now = self.clock.now();
        let mut markers = HashMap::with_capacity(drivers.len());
        let mut moved = 0;

        for driver in drivers {
            let (Some(id), Some(reported)) = (&driver.id, driver.position) else {
                continue;
            };
            if !reported.is_finite() {
                continue;
            }

            let run = match self.markers.remove(id) {
                Some(run) if run.end() == reported => run,
                Some(run) => {
                    moved += 1;
                    let from = run.position_at(now);
                    InterpolationRun::new(self.ids.next_id(), from, reported, now, self.smoothing)
                }
                None => {
                    let run_id = self.ids.next_id();
                    InterpolationRun::new(run_id, reported, reported, now, TimeDelta::zero())
                }
            };
            markers.insert(id.clone(), run);
        }

        self.markers = markers;
        moved
    }

    pub fn position_of(&self, driver_id: &str) -> Option<LatLng> {
        let now = self.clock.now();
        self.markers.get(driver_id).map(|run| run.position_at(now))
    }

    /// Every marker's current position, ordered by driver id.
    pub fn positions(&self) -> Vec<(String, LatLng)> {
        let now = self.clock.now();
        let mut positions: Vec<_> = self
            .markers
            .iter()
            .map(|(id, run)| (id.clone(), run.position_at(now)))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        positions
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn driver(id: &str, lat: f64, lng: f64) -> DriverRecord {
        DriverRecord {
            id: Some(id.to_string()),
            position: Some(LatLng::new(lat, lng)),
            ..Default::default()
        }
    }

    fn setup() -> (ManualClock, LiveTracker) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap());
        let tracker = LiveTracker::new(Arc::new(clock.clone()), TimeDelta::seconds(2));
        (clock, tracker)
    }

    #[test]
    fn test_first_sighting_places_marker() {
        let (_, mut tracker) = setup();
        assert_eq!(tracker.observe(&[driver("d1", 1.0, 2.0)]), 0);
        assert_eq!(tracker.position_of("d1"), Some(LatLng::new(1.0, 2.0)));
    }

    #[test]
    fn test_move_glides_over_smoothing_window() {
        let (clock, mut tracker) = setup();
        tracker.observe(&[driver("d1", 0.0, 0.0)]);

        assert_eq!(tracker.observe(&[driver("d1", 4.0, 8.0)]), 1);
        assert_eq!(tracker.position_of("d1"), Some(LatLng::new(0.0, 0.0)));

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(tracker.position_of("d1"), Some(LatLng::new(2.0, 4.0)));

        clock.advance(TimeDelta::seconds(5));
        assert_eq!(tracker.position_of("d1"), Some(LatLng::new(4.0, 8.0)));
    }

    #[test]
    fn test_unchanged_position_keeps_run() {
        let (clock, mut tracker) = setup();
        tracker.observe(&[driver("d1", 0.0, 0.0)]);
        tracker.observe(&[driver("d1", 4.0, 0.0)]);
        clock.advance(TimeDelta::seconds(1));

        assert_eq!(tracker.observe(&[driver("d1", 4.0, 0.0)]), 0);
        assert_eq!(tracker.position_of("d1"), Some(LatLng::new(2.0, 0.0)));
    }

    #[test]
    fn test_absent_and_unpositioned_drivers_are_dropped() {
        let (_, mut tracker) = setup();
        tracker.observe(&[driver("d1", 0.0, 0.0), driver("d2", 1.0, 1.0)]);

        let unpositioned = DriverRecord {
            id: Some("d3".into()),
            ..Default::default()
        };
        tracker.observe(&[driver("d2", 1.0, 1.0), unpositioned]);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.positions(), vec![("d2".to_string(), LatLng::new(1.0, 1.0))]);
    }
}
