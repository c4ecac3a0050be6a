use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::model::LatLng;

/// Identifies one interpolation run. Ids only ever increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunId(pub u64);

/// Hands out increasing [`RunId`]s.
#[derive(Debug, Default)]
pub struct RunIds {
    next: u64,
}

impl RunIds {
    pub fn next_id(&mut self) -> RunId {
        self.next += 1;
        RunId(self.next)
    }
}

/// Straight-line motion from `start` to `end` over `duration`.
///
/// The position is a pure function of the instant it is sampled at, so any
/// number of observers can read the same run.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationRun {
    id: RunId,
    start: LatLng,
    end: LatLng,
    start_time: DateTime<Utc>,
    duration: TimeDelta,
}

impl InterpolationRun {
    /// Negative durations are treated as zero.
    pub fn new(
        id: RunId,
        start: LatLng,
        end: LatLng,
        start_time: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Self {
        Self {
            id,
            start,
            end,
            start_time,
            duration: duration.max(TimeDelta::zero()),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn start(&self) -> LatLng {
        self.start
    }

    pub fn end(&self) -> LatLng {
        self.end
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Saturates at the latest representable instant.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Completed share of the run, in `[0, 1]`.
    pub fn fraction_at(&self, now: DateTime<Utc>) -> f64 {
        if now >= self.end_time() {
            return 1.0;
        }
        let elapsed = now - self.start_time;
        if elapsed <= TimeDelta::zero() {
            return 0.0;
        }
        (seconds(elapsed) / seconds(self.duration)).clamp(0.0, 1.0)
    }

    pub fn position_at(&self, now: DateTime<Utc>) -> LatLng {
        let t = self.fraction_at(now);
        if t <= 0.0 {
            self.start
        } else if t >= 1.0 {
            self.end
        } else {
            lerp(self.start, self.end, t)
        }
    }

    pub fn is_complete_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time()
    }
}

/// Per-axis linear interpolation.
pub fn lerp(a: LatLng, b: LatLng, t: f64) -> LatLng {
    LatLng {
        lat: a.lat + (b.lat - a.lat) * t,
        lng: a.lng + (b.lng - a.lng) * t,
    }
}

pub(crate) fn seconds(d: TimeDelta) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Converts fractional seconds to a `TimeDelta`, rounding to microseconds.
pub fn delta_from_secs(secs: f64) -> TimeDelta {
    TimeDelta::microseconds((secs * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn run() -> InterpolationRun {
        InterpolationRun::new(
            RunId(1),
            LatLng::new(10.0, -20.0),
            LatLng::new(20.0, -10.0),
            t0(),
            TimeDelta::seconds(10),
        )
    }

    #[test]
    fn test_endpoints() {
        let r = run();
        assert_eq!(r.position_at(t0()), LatLng::new(10.0, -20.0));
        assert_eq!(r.position_at(t0() + TimeDelta::seconds(10)), LatLng::new(20.0, -10.0));
    }

    #[test]
    fn test_midpoint_is_exact() {
        let r = run();
        assert_eq!(r.position_at(t0() + TimeDelta::seconds(5)), LatLng::new(15.0, -15.0));
        assert_eq!(r.fraction_at(t0() + TimeDelta::seconds(5)), 0.5);
    }

    #[test]
    fn test_clamps_outside_window() {
        let r = run();
        assert_eq!(r.position_at(t0() - TimeDelta::seconds(3)), r.start());
        assert_eq!(r.position_at(t0() + TimeDelta::hours(1)), r.end());
        assert!(!r.is_complete_at(t0() + TimeDelta::seconds(9)));
        assert!(r.is_complete_at(t0() + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_sampling_does_not_change_the_run() {
        let r = run();
        let before = r.clone();
        for s in 0..12 {
            r.position_at(t0() + TimeDelta::seconds(s));
        }
        assert_eq!(r, before);
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let r = InterpolationRun::new(
            RunId(2),
            LatLng::new(0.0, 0.0),
            LatLng::new(1.0, 1.0),
            t0(),
            TimeDelta::zero(),
        );
        assert_eq!(r.position_at(t0()), LatLng::new(1.0, 1.0));
        assert_eq!(r.position_at(t0() - TimeDelta::seconds(1)), LatLng::new(0.0, 0.0));
    }

    #[test]
    fn test_huge_duration_saturates_end_time() {
        let r = InterpolationRun::new(
            RunId(3),
            LatLng::new(0.0, 0.0),
            LatLng::new(1.0, 1.0),
            t0(),
            delta_from_secs(1e13),
        );
        assert_eq!(r.end_time(), DateTime::<Utc>::MAX_UTC);
        assert!(!r.is_complete_at(t0() + TimeDelta::days(365)));
        assert!(r.fraction_at(t0() + TimeDelta::days(365)) < 0.01);
    }

    #[test]
    fn test_run_ids_increase() {
        let mut ids = RunIds::default();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
    }
}
