//! Synthetic demo motion for a batch of vehicles.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::model::LatLng;
use crate::motion::interpolator::{InterpolationRun, RunId, RunIds, delta_from_secs};

/// Longest accepted run, one week.
pub const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 60.0 * 60.0;

/// One vehicle to move from `start` to `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub entity_id: String,
    pub start: LatLng,
    pub end: LatLng,
    pub duration_seconds: f64,
}

impl SimulationConfig {
    pub fn is_valid(&self) -> bool {
        !self.entity_id.trim().is_empty()
            && self.start.is_finite()
            && self.end.is_finite()
            && self.duration_seconds.is_finite()
            && self.duration_seconds > 0.0
            && self.duration_seconds <= MAX_DURATION_SECS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPosition {
    pub entity_id: String,
    pub run_id: RunId,
    pub position: LatLng,
    pub state: RunState,
}

/// What a tick produced: every tracked entity's position plus batch progress
/// (0–100).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationFrame {
    pub at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub positions: Vec<EntityPosition>,
}

struct ActiveRun {
    run: InterpolationRun,
    state: RunState,
    last_position: LatLng,
}

/// Owns the batch of simulated runs and advances them on a shared clock.
///
/// There is one registry and no per-run timer: stopping clears the registry
/// and nothing is left that could emit a stale position.
pub struct SimulationController {
    clock: Arc<dyn Clock>,
    ids: RunIds,
    runs: BTreeMap<String, ActiveRun>,
    // finished runs dropped by clear_finished still count toward progress
    cleared: usize,
    progress: f64,
    tx: watch::Sender<SimulationFrame>,
}

impl SimulationController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = watch::channel(SimulationFrame::default());
        Self {
            clock,
            ids: RunIds::default(),
            runs: BTreeMap::new(),
            cleared: 0,
            progress: 0.0,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SimulationFrame> {
        self.tx.subscribe()
    }

    /// Replaces the whole batch with one run per valid config, all starting
    /// now. Returns the number of runs started; zero leaves the current batch
    /// untouched.
    pub fn start(&mut self, configs: &[SimulationConfig]) -> usize {
        let valid: Vec<&SimulationConfig> = configs.iter().filter(|c| c.is_valid()).collect();
        if valid.is_empty() {
            debug!(requested = configs.len(), "No valid simulation configs, ignoring start");
            return 0;
        }

        let now = self.clock.now();
        let cancelled = self.runs.len();
        self.runs.clear();
        self.cleared = 0;
        self.progress = 0.0;

        for config in valid {
            let run = InterpolationRun::new(
                self.ids.next_id(),
                config.start,
                config.end,
                now,
                delta_from_secs(config.duration_seconds),
            );
            self.runs.insert(
                config.entity_id.clone(),
                ActiveRun {
                    run,
                    state: RunState::Running,
                    last_position: config.start,
                },
            );
        }

        info!(
            started = self.runs.len(),
            skipped = configs.len() - self.runs.len(),
            cancelled,
            "Simulation batch started"
        );
        self.runs.len()
    }

    /// Samples every running run at the current instant and publishes the
    /// resulting frame.
    pub fn tick(&mut self) -> SimulationFrame {
        let now = self.clock.now();

        for (entity_id, active) in self.runs.iter_mut() {
            if active.state == RunState::Finished {
                continue;
            }
            active.last_position = active.run.position_at(now);
            if active.run.is_complete_at(now) {
                active.state = RunState::Finished;
                debug!(entity_id, run_id = active.run.id().0, "Simulated run finished");
            }
        }

        let batch = self.runs.len() + self.cleared;
        if batch > 0 {
            let done: f64 = self
                .runs
                .values()
                .map(|a| match a.state {
                    RunState::Finished => 1.0,
                    RunState::Running => a.run.fraction_at(now),
                })
                .sum::<f64>()
                + self.cleared as f64;
            self.progress = self.progress.max(done / batch as f64 * 100.0);
        }

        let frame = self.frame(Some(now));
        self.tx.send_replace(frame.clone());
        frame
    }

    /// Cancels every run at once. Runs do not get to reach their destination.
    pub fn stop(&mut self) {
        let cancelled = self.runs.len();
        self.runs.clear();
        self.cleared = 0;
        self.progress = 0.0;
        self.tx.send_replace(SimulationFrame::default());
        info!(cancelled, "Simulation stopped");
    }

    /// Forgets finished runs' retained positions. Returns how many were dropped.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, a| a.state != RunState::Finished);
        let dropped = before - self.runs.len();
        self.cleared += dropped;
        dropped
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Runs still moving.
    pub fn active_runs(&self) -> usize {
        self.runs
            .values()
            .filter(|a| a.state == RunState::Running)
            .count()
    }

    /// Runs tracked, finished ones included.
    pub fn tracked(&self) -> usize {
        self.runs.len()
    }

    pub fn is_finished(&self) -> bool {
        !self.runs.is_empty() && self.active_runs() == 0
    }

    /// Last sampled position of `entity_id`.
    pub fn position_of(&self, entity_id: &str) -> Option<LatLng> {
        self.runs.get(entity_id).map(|a| a.last_position)
    }

    fn frame(&self, at: Option<DateTime<Utc>>) -> SimulationFrame {
        SimulationFrame {
            at,
            progress: self.progress,
            positions: self
                .runs
                .iter()
                .map(|(entity_id, a)| EntityPosition {
                    entity_id: entity_id.clone(),
                    run_id: a.run.id(),
                    position: a.last_position,
                    state: a.state,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeDelta, TimeZone};

    fn setup() -> (ManualClock, SimulationController) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap());
        let controller = SimulationController::new(Arc::new(clock.clone()));
        (clock, controller)
    }

    fn config(id: &str, secs: f64) -> SimulationConfig {
        SimulationConfig {
            entity_id: id.to_string(),
            start: LatLng::new(0.0, 0.0),
            end: LatLng::new(10.0, 20.0),
            duration_seconds: secs,
        }
    }

    #[test]
    fn test_empty_start_leaves_batch_untouched() {
        let (_, mut sim) = setup();
        sim.start(&[config("a", 10.0)]);

        assert_eq!(sim.start(&[]), 0);
        assert_eq!(sim.tracked(), 1);
    }

    #[test]
    fn test_all_invalid_configs_is_a_no_op() {
        let (_, mut sim) = setup();
        sim.start(&[config("a", 10.0)]);

        let invalid = vec![
            config("", 10.0),
            config("b", 0.0),
            config("c", f64::NAN),
            SimulationConfig {
                start: LatLng::new(f64::INFINITY, 0.0),
                ..config("d", 5.0)
            },
        ];

        assert_eq!(sim.start(&invalid), 0);
        assert!(sim.position_of("a").is_some());
    }

    #[test]
    fn test_overlong_duration_is_rejected() {
        let (clock, mut sim) = setup();

        assert_eq!(sim.start(&[config("far", 1e13)]), 0);
        assert_eq!(sim.start(&[config("week", MAX_DURATION_SECS)]), 1);

        clock.advance(TimeDelta::days(1));
        let frame = sim.tick();
        assert!(frame.progress > 0.0 && frame.progress < 100.0);
    }

    #[test]
    fn test_start_then_stop_resets() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 10.0), config("b", 20.0)]);
        clock.advance(TimeDelta::seconds(5));
        sim.tick();

        sim.stop();

        assert_eq!(sim.progress(), 0.0);
        assert_eq!(sim.active_runs(), 0);
        assert_eq!(sim.tracked(), 0);
        assert_eq!(*sim.subscribe().borrow(), SimulationFrame::default());
    }

    #[test]
    fn test_tick_interpolates_and_reports_progress() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 10.0), config("b", 20.0)]);

        clock.advance(TimeDelta::seconds(5));
        let frame = sim.tick();

        assert_eq!(sim.position_of("a"), Some(LatLng::new(5.0, 10.0)));
        // (0.5 + 0.25) / 2
        assert_eq!(frame.progress, 37.5);
        assert_eq!(frame.positions.len(), 2);
    }

    #[test]
    fn test_finished_runs_keep_last_position() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 10.0), config("b", 20.0)]);

        clock.advance(TimeDelta::seconds(12));
        sim.tick();

        assert_eq!(sim.active_runs(), 1);
        assert_eq!(sim.position_of("a"), Some(LatLng::new(10.0, 20.0)));

        clock.advance(TimeDelta::seconds(10));
        let frame = sim.tick();
        assert_eq!(frame.progress, 100.0);
        assert!(sim.is_finished());
        assert!(frame.positions.iter().all(|p| p.state == RunState::Finished));
    }

    #[test]
    fn test_progress_is_monotonic_within_a_batch() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 4.0), config("b", 8.0), config("c", 16.0)]);

        let mut last = 0.0;
        for step in 0..20 {
            clock.advance(TimeDelta::seconds(1));
            let p = sim.tick().progress;
            assert!(p >= last, "progress dropped at step {step}: {p} < {last}");
            last = p;
            if step == 6 {
                sim.clear_finished();
            }
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_second_start_replaces_batch() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 10.0), config("b", 10.0)]);
        clock.advance(TimeDelta::seconds(5));
        sim.tick();

        sim.start(&[config("c", 10.0)]);

        assert_eq!(sim.tracked(), 1);
        assert_eq!(sim.position_of("a"), None);
        assert_eq!(sim.progress(), 0.0);
        assert_eq!(sim.position_of("c"), Some(LatLng::new(0.0, 0.0)));
    }

    #[test]
    fn test_clear_finished_drops_only_finished() {
        let (clock, mut sim) = setup();
        sim.start(&[config("a", 5.0), config("b", 50.0)]);
        clock.advance(TimeDelta::seconds(6));
        sim.tick();

        assert_eq!(sim.clear_finished(), 1);
        assert_eq!(sim.position_of("a"), None);
        assert!(sim.position_of("b").is_some());
    }
}
