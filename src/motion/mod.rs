//! Time-based motion for map markers.
//!
//! Everything here reduces to [`InterpolationRun`]: a straight line sampled
//! as a pure function of time. The controllers only decide which runs exist.

pub mod interpolator;
pub mod playback;
pub mod simulation;
pub mod tracking;

pub use interpolator::{InterpolationRun, RunId, RunIds, lerp};
pub use playback::{PlaybackController, PlaybackError, PlaybackState, SPEEDS, Waypoint};
pub use simulation::{
    EntityPosition, MAX_DURATION_SECS, RunState, SimulationConfig, SimulationController,
    SimulationFrame,
};
pub use tracking::LiveTracker;
