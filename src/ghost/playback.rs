//! Ghost lap playback
//!
//! A slot playing a ghost first drives at a constant approach throttle until
//! it crosses the line. Every crossing from then on restarts the recorded lap
//! from its first sample.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::lap::RecordedLap;
use crate::types::{MAX_MULTIPLIER, SLOT_COUNT, SlotId};

/// Where a playing ghost is within its lap cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackPhase {
    /// Driving to the line at the approach throttle.
    Approaching,
    /// Replaying the lap; elapsed time counts from the last crossing.
    Racing,
}

#[derive(Debug, Clone)]
struct PlaybackSession {
    lap: Arc<RecordedLap>,
    phase: PlaybackPhase,
    origin: Option<SystemTime>,
    approach_throttle: u8,
}

impl PlaybackSession {
    fn throttle_at(&self, now: SystemTime) -> u8 {
        match (self.phase, self.origin) {
            (PlaybackPhase::Racing, Some(origin)) => {
                let elapsed = now.duration_since(origin).unwrap_or(Duration::ZERO);
                self.lap.throttle_at(elapsed).unwrap_or(self.approach_throttle)
            }
            _ => self.approach_throttle,
        }
    }
}

/// Per-slot playback state, each slot behind its own lock.
#[derive(Debug, Default)]
pub struct GhostPlayback {
    slots: [Mutex<Option<PlaybackSession>>; SLOT_COUNT],
}

impl GhostPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `lap` on `slot`, starting in the approach phase.
    ///
    /// Replaces whatever the slot was playing.
    pub fn start_playback(&self, slot: SlotId, lap: Arc<RecordedLap>, approach_throttle: u8) {
        let approach_throttle = approach_throttle.min(MAX_MULTIPLIER);
        info!(%slot, lap = %lap.name, approach_throttle, "Ghost playback started");
        *self.slots[slot.index()].lock() = Some(PlaybackSession {
            lap,
            phase: PlaybackPhase::Approaching,
            origin: None,
            approach_throttle,
        });
    }

    /// Returns `true` if the slot was playing.
    pub fn stop_playback(&self, slot: SlotId) -> bool {
        let stopped = self.slots[slot.index()].lock().take().is_some();
        if stopped {
            info!(%slot, "Ghost playback stopped");
        }
        stopped
    }

    /// Restart the lap at `event_time`. No-op for idle slots.
    pub fn on_lap_completed(&self, slot: SlotId, event_time: SystemTime) {
        if let Some(session) = self.slots[slot.index()].lock().as_mut() {
            if session.phase == PlaybackPhase::Approaching {
                debug!(%slot, "Ghost reached the line, racing");
            }
            session.phase = PlaybackPhase::Racing;
            session.origin = Some(event_time);
        }
    }

    /// Throttle the ghost should run at `now`, or `None` if not playing.
    pub fn throttle_at(&self, slot: SlotId, now: SystemTime) -> Option<u8> {
        self.slots[slot.index()].lock().as_ref().map(|session| session.throttle_at(now))
    }

    pub fn phase(&self, slot: SlotId) -> Option<PlaybackPhase> {
        self.slots[slot.index()].lock().as_ref().map(|session| session.phase)
    }

    pub fn is_active(&self, slot: SlotId) -> bool {
        self.slots[slot.index()].lock().is_some()
    }

    /// The lap playing on `slot`.
    pub fn lap(&self, slot: SlotId) -> Option<Arc<RecordedLap>> {
        self.slots[slot.index()].lock().as_ref().map(|session| Arc::clone(&session.lap))
    }

    pub fn stop_all(&self) {
        for slot in SlotId::all() {
            self.stop_playback(slot);
        }
    }
}
