//! Ghost car recording and playback
//!
//! A ghost is a recorded lap of throttle samples replayed on a slot with
//! ghost mode set, so the car drives itself.

mod lap;
mod playback;
mod recording;

pub use lap::{GhostSample, InMemoryLapStore, LapStore, RecordedLap, default_lap_name};
pub use playback::{GhostPlayback, PlaybackPhase};
pub use recording::{GhostRecorder, RecordingProgress, RecordingState, scale_throttle};
