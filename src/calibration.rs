//! Device tick to wall-clock calibration
//!
//! The powerbase stamps crossings with a free-running centisecond counter.
//! The first slot notification after each power-on pins that counter to local
//! wall-clock time; every later tick is translated through the same origin.
//! Power-on clears the origin so a previous power cycle is never applied.

use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, warn};

/// Length of one device tick.
pub const TICK: Duration = Duration::from_millis(10);

/// Convert a device tick count to a duration.
pub fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_millis(u64::from(ticks) * 10)
}

/// The wall-clock instant the device counter read zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationPoint {
    pub origin: SystemTime,
}

impl CalibrationPoint {
    pub fn to_wall_clock(&self, tick: u32) -> SystemTime {
        self.origin + ticks_to_duration(tick)
    }
}

/// Calibration state shared between the driver and its readers.
///
/// Updates go through a watch channel so a reset and a first observation can
/// never interleave into a half-written state.
#[derive(Debug)]
pub struct TimingCalibration {
    state: watch::Sender<Option<CalibrationPoint>>,
}

impl Default for TimingCalibration {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingCalibration {
    pub fn new() -> Self {
        Self { state: watch::Sender::new(None) }
    }

    /// Forget the current origin. Called on every power-on.
    pub fn reset(&self) {
        if self.state.send_replace(None).is_some() {
            debug!("Timing calibration reset");
        }
    }

    /// Pin `tick` to `now` if no origin is established yet.
    ///
    /// Returns `true` when this call established the calibration.
    pub fn observe(&self, tick: u32, now: SystemTime) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            match now.checked_sub(ticks_to_duration(tick)) {
                Some(origin) => {
                    debug!(tick, "Timing calibration established");
                    *state = Some(CalibrationPoint { origin });
                    true
                }
                None => {
                    warn!(tick, "Cannot calibrate: tick predates the wall-clock epoch");
                    false
                }
            }
        })
    }

    /// Translate a device tick, or `None` while uncalibrated.
    pub fn to_wall_clock(&self, tick: u32) -> Option<SystemTime> {
        self.state.borrow().map(|point| point.to_wall_clock(tick))
    }

    pub fn current(&self) -> Option<CalibrationPoint> {
        *self.state.borrow()
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Watch calibration changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<CalibrationPoint>> {
        self.state.subscribe()
    }
}
