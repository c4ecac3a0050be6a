//! Scrubbing through one recorded path at a chosen speed.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::model::LatLng;
use crate::motion::interpolator::{InterpolationRun, RunId, RunIds, delta_from_secs, seconds};

/// Speed multipliers, in cycling order.
pub const SPEEDS: [u32; 3] = [1, 2, 4];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: LatLng,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Paused,
    Playing,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("no playback session is open")]
    NoSession,
    #[error("a playback path needs at least one waypoint")]
    EmptyPath,
    #[error("unsupported playback speed {0}x")]
    UnsupportedSpeed(u32),
}

struct PlaybackSession {
    subject: String,
    run_id: RunId,
    path: Vec<Waypoint>,
    position: f64,
    speed: u32,
    playing: bool,
    last_advance: DateTime<Utc>,
}

impl PlaybackSession {
    fn total(&self) -> TimeDelta {
        match (self.path.first(), self.path.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => TimeDelta::zero(),
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        if !self.playing {
            return;
        }
        let elapsed = (now - self.last_advance).max(TimeDelta::zero());
        self.last_advance = now;

        let total = self.total();
        if total <= TimeDelta::zero() {
            self.position = 1.0;
        } else {
            self.position += self.speed as f64 * seconds(elapsed) / seconds(total);
        }

        self.position = self.position.clamp(0.0, 1.0);
        if self.position >= 1.0 {
            self.playing = false;
            debug!(subject = %self.subject, "Playback reached end of path");
        }
    }

    /// Interpolates inside the waypoint segment that brackets the current
    /// position.
    fn sample(&self) -> LatLng {
        let first = self.path[0];
        let target = first.timestamp + delta_from_secs(seconds(self.total()) * self.position);

        let next = self
            .path
            .partition_point(|w| w.timestamp <= target)
            .clamp(1, self.path.len().max(1));
        if next >= self.path.len() {
            return self.path[self.path.len() - 1].position;
        }

        let a = self.path[next - 1];
        let b = self.path[next];
        InterpolationRun::new(
            self.run_id,
            a.position,
            b.position,
            a.timestamp,
            b.timestamp - a.timestamp,
        )
        .position_at(target)
    }
}

/// Drives a single recorded path.
///
/// `Idle` until a subject is selected, then `Paused` / `Playing`. Playing
/// stops by itself at the end of the path; it never loops.
pub struct PlaybackController {
    clock: Arc<dyn Clock>,
    ids: RunIds,
    session: Option<PlaybackSession>,
}

impl PlaybackController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ids: RunIds::default(),
            session: None,
        }
    }

    /// Opens a session for `subject`, discarding any previous one. Waypoints
    /// are ordered by timestamp.
    pub fn select(&mut self, subject: &str, mut path: Vec<Waypoint>) -> Result<(), PlaybackError> {
        if path.is_empty() {
            return Err(PlaybackError::EmptyPath);
        }
        path.sort_by_key(|w| w.timestamp);

        debug!(subject, waypoints = path.len(), "Playback session opened");
        self.session = Some(PlaybackSession {
            subject: subject.to_string(),
            run_id: self.ids.next_id(),
            path,
            position: 0.0,
            speed: SPEEDS[0],
            playing: false,
            last_advance: self.clock.now(),
        });
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(subject = %session.subject, "Playback session closed");
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.session {
            None => PlaybackState::Idle,
            Some(s) if s.playing => PlaybackState::Playing,
            Some(_) => PlaybackState::Paused,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.subject.as_str())
    }

    /// Starts advancing. At the end of the path this does nothing.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        let now = self.clock.now();
        let session = self.session_mut()?;
        if session.position < 1.0 {
            session.playing = true;
            session.last_advance = now;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        let now = self.clock.now();
        let session = self.session_mut()?;
        session.advance(now);
        session.playing = false;
        Ok(())
    }

    /// Back to the start of the path, paused.
    pub fn restart(&mut self) -> Result<(), PlaybackError> {
        let session = self.session_mut()?;
        session.position = 0.0;
        session.playing = false;
        Ok(())
    }

    /// Moves to the next multiplier in [`SPEEDS`], wrapping around.
    pub fn cycle_speed(&mut self) -> Result<u32, PlaybackError> {
        let current = self.speed()?;
        let idx = SPEEDS.iter().position(|s| *s == current).unwrap_or(0);
        let next = SPEEDS[(idx + 1) % SPEEDS.len()];
        self.set_speed(next)?;
        Ok(next)
    }

    /// Time already played accrues at the old speed; the new one applies from
    /// the next advance on.
    pub fn set_speed(&mut self, multiplier: u32) -> Result<(), PlaybackError> {
        let now = self.clock.now();
        let session = self.session_mut()?;
        if !SPEEDS.contains(&multiplier) {
            return Err(PlaybackError::UnsupportedSpeed(multiplier));
        }
        session.advance(now);
        session.speed = multiplier;
        Ok(())
    }

    /// Moves the position forward by the time elapsed since the last advance.
    /// Returns the new position.
    pub fn advance(&mut self) -> Result<f64, PlaybackError> {
        let now = self.clock.now();
        let session = self.session_mut()?;
        session.advance(now);
        Ok(session.position)
    }

    /// Playback position in `[0, 1]`.
    pub fn position(&self) -> Result<f64, PlaybackError> {
        Ok(self.session_ref()?.position)
    }

    pub fn speed(&self) -> Result<u32, PlaybackError> {
        Ok(self.session_ref()?.speed)
    }

    /// Map position at the current playback position.
    pub fn current_position(&self) -> Result<LatLng, PlaybackError> {
        Ok(self.session_ref()?.sample())
    }

    fn session_ref(&self) -> Result<&PlaybackSession, PlaybackError> {
        self.session.as_ref().ok_or(PlaybackError::NoSession)
    }

    fn session_mut(&mut self) -> Result<&mut PlaybackSession, PlaybackError> {
        self.session.as_mut().ok_or(PlaybackError::NoSession)
    }
}
