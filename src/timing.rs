//! Lap timing engine
//!
//! Turns finish line crossings into lap completions. Each slot keeps the last
//! crossing tick, lap count, last lap and best lap. The first crossing after a
//! reset only arms the slot; every later crossing with a nonzero tick delta
//! completes a lap.
//!
//! Per-slot state lives in its own watch channel: the driver task is the only
//! writer on the notification path and readers get copies of the latest
//! committed [`LapSnapshot`] without a shared lock.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::calibration::{TimingCalibration, ticks_to_duration};
use crate::protocol::SlotNotification;
use crate::types::{SLOT_COUNT, SlotId};

/// Ticks elapsed from `previous` to `current` across 32-bit overflow.
pub fn tick_delta(current: u32, previous: u32) -> u32 {
    current.wrapping_sub(previous)
}

/// Committed lap state for one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapSnapshot {
    /// Latest crossing tick, `None` until the first crossing.
    pub last_max_tick: Option<u32>,
    pub lap_count: u32,
    pub last_lap_ticks: Option<u32>,
    pub best_lap_ticks: Option<u32>,
}

impl LapSnapshot {
    pub fn last_lap(&self) -> Option<Duration> {
        self.last_lap_ticks.map(ticks_to_duration)
    }

    pub fn best_lap(&self) -> Option<Duration> {
        self.best_lap_ticks.map(ticks_to_duration)
    }

    /// Last lap in seconds (ticks / 100).
    pub fn last_lap_seconds(&self) -> Option<f64> {
        self.last_lap_ticks.map(|t| f64::from(t) / 100.0)
    }

    pub fn best_lap_seconds(&self) -> Option<f64> {
        self.best_lap_ticks.map(|t| f64::from(t) / 100.0)
    }
}

/// A completed lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapCompleted {
    pub slot: SlotId,
    pub lap: u32,
    pub lap_ticks: u32,
    /// Wall-clock time of the crossing that completed the lap.
    pub event_time: SystemTime,
    /// `false` when `event_time` fell back to notification arrival time.
    pub calibrated: bool,
    pub personal_best: bool,
}

impl LapCompleted {
    pub fn lap_time(&self) -> Duration {
        ticks_to_duration(self.lap_ticks)
    }

    pub fn lap_seconds(&self) -> f64 {
        f64::from(self.lap_ticks) / 100.0
    }
}

/// Per-slot lap state machines.
#[derive(Debug)]
pub struct LapTimingEngine {
    slots: [watch::Sender<LapSnapshot>; SLOT_COUNT],
    calibration: Arc<TimingCalibration>,
}

impl LapTimingEngine {
    pub fn new(calibration: Arc<TimingCalibration>) -> Self {
        Self {
            slots: std::array::from_fn(|_| watch::Sender::new(LapSnapshot::default())),
            calibration,
        }
    }

    pub fn calibration(&self) -> &Arc<TimingCalibration> {
        &self.calibration
    }

    /// Advance a slot's state with a crossing.
    ///
    /// `arrival` is the local time the notification arrived, used as the
    /// event time when the device clock is not calibrated.
    pub fn process(
        &self,
        notification: &SlotNotification,
        arrival: SystemTime,
    ) -> Option<LapCompleted> {
        let slot = notification.slot;
        let max_tick = notification.max_entry_tick();

        let mut completed = None;
        self.slots[slot.index()].send_if_modified(|state| {
            let Some(previous) = state.last_max_tick else {
                trace!(%slot, tick = max_tick, "First crossing, slot armed");
                state.last_max_tick = Some(max_tick);
                return true;
            };

            let delta = tick_delta(max_tick, previous);
            if delta == 0 {
                trace!(%slot, tick = max_tick, "Duplicate crossing ignored");
                return false;
            }

            let personal_best = state.best_lap_ticks.is_none_or(|best| delta < best);
            state.lap_count += 1;
            state.last_lap_ticks = Some(delta);
            state.best_lap_ticks = Some(state.best_lap_ticks.map_or(delta, |best| best.min(delta)));
            state.last_max_tick = Some(max_tick);

            let (event_time, calibrated) = match self.calibration.to_wall_clock(max_tick) {
                Some(time) => (time, true),
                None => (arrival, false),
            };

            completed = Some(LapCompleted {
                slot,
                lap: state.lap_count,
                lap_ticks: delta,
                event_time,
                calibrated,
                personal_best,
            });
            true
        });

        if let Some(lap) = &completed {
            debug!(
                slot = %lap.slot,
                lap = lap.lap,
                seconds = lap.lap_seconds(),
                calibrated = lap.calibrated,
                "Lap completed"
            );
        }
        completed
    }

    pub fn snapshot(&self, slot: SlotId) -> LapSnapshot {
        *self.slots[slot.index()].borrow()
    }

    pub fn subscribe(&self, slot: SlotId) -> watch::Receiver<LapSnapshot> {
        self.slots[slot.index()].subscribe()
    }

    /// Clear one slot's lap state.
    pub fn reset_slot(&self, slot: SlotId) {
        self.slots[slot.index()].send_replace(LapSnapshot::default());
        debug!(%slot, "Lap state reset");
    }

    /// Clear every slot.
    pub fn reset_all(&self) {
        for slot in SlotId::all() {
            self.reset_slot(slot);
        }
    }
}
