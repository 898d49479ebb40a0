//! Ghost lap recording
//!
//! Per slot: `Idle` → `WaitingForLapStart` → `Recording`. The first crossing
//! after a start defines t=0; each later crossing finalizes the buffered
//! samples into a [`RecordedLap`]. Multi-lap sessions continue straight into
//! the next lap until the requested count is reached.

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::lap::{GhostSample, RecordedLap};
use crate::types::{MAX_MULTIPLIER, SLOT_COUNT, SlotId};

/// Recording state of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    WaitingForLapStart,
    Recording,
}

/// Recording progress for one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingProgress {
    pub state: RecordingState,
    pub laps_recorded: u32,
    pub target_laps: u32,
    pub buffered_samples: usize,
}

#[derive(Debug, Default)]
struct SlotRecorder {
    state: RecordingState,
    target_laps: u32,
    laps_recorded: u32,
    lap_start: Option<SystemTime>,
    samples: Vec<GhostSample>,
}

impl SlotRecorder {
    fn clear(&mut self) {
        *self = SlotRecorder::default();
    }
}

/// Scale a raw controller throttle by the slot's power multiplier.
pub fn scale_throttle(throttle: u8, multiplier: u8) -> u8 {
    let throttle = u16::from(throttle.min(MAX_MULTIPLIER));
    let multiplier = u16::from(multiplier.min(MAX_MULTIPLIER));
    let max = u16::from(MAX_MULTIPLIER);
    ((throttle * multiplier + max / 2) / max) as u8
}

/// Per-slot lap recorders, each behind its own lock.
#[derive(Debug, Default)]
pub struct GhostRecorder {
    slots: [Mutex<SlotRecorder>; SLOT_COUNT],
}

impl GhostRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a slot to record `target_laps` laps (at least one) starting at
    /// its next crossing. Any open recording is discarded.
    pub fn start_recording(&self, slot: SlotId, target_laps: u32) {
        let mut recorder = self.slots[slot.index()].lock();
        recorder.clear();
        recorder.state = RecordingState::WaitingForLapStart;
        recorder.target_laps = target_laps.max(1);
        info!(%slot, target_laps = recorder.target_laps, "Recording armed");
    }

    /// Begin a new lap at `lap_start` without waiting for a crossing.
    pub fn continue_recording(&self, slot: SlotId, lap_start: SystemTime) {
        let mut recorder = self.slots[slot.index()].lock();
        Self::begin_lap(&mut recorder, lap_start);
        if recorder.target_laps == 0 {
            recorder.target_laps = 1;
        }
    }

    /// Abandon recording; the open buffer is dropped.
    ///
    /// Returns the number of discarded samples.
    pub fn stop_recording(&self, slot: SlotId) -> usize {
        let mut recorder = self.slots[slot.index()].lock();
        let discarded = recorder.samples.len();
        if recorder.state != RecordingState::Idle {
            info!(%slot, discarded, "Recording stopped");
        }
        recorder.clear();
        discarded
    }

    pub fn state(&self, slot: SlotId) -> RecordingState {
        self.slots[slot.index()].lock().state
    }

    pub fn progress(&self, slot: SlotId) -> RecordingProgress {
        let recorder = self.slots[slot.index()].lock();
        RecordingProgress {
            state: recorder.state,
            laps_recorded: recorder.laps_recorded,
            target_laps: recorder.target_laps,
            buffered_samples: recorder.samples.len(),
        }
    }

    /// Append a power-scaled throttle sample taken at `at`.
    ///
    /// Returns `false` (sample dropped) unless the slot is recording.
    pub fn record_sample(&self, slot: SlotId, throttle: u8, at: SystemTime) -> bool {
        let mut recorder = self.slots[slot.index()].lock();
        if recorder.state != RecordingState::Recording {
            return false;
        }
        let Some(lap_start) = recorder.lap_start else {
            return false;
        };

        let elapsed = at.duration_since(lap_start).unwrap_or(Duration::ZERO);
        let elapsed_ms = elapsed.as_millis().min(u128::from(u32::MAX)) as u32;
        recorder.samples.push(GhostSample { elapsed_ms, throttle: throttle.min(MAX_MULTIPLIER) });
        trace!(%slot, elapsed_ms, throttle, "Ghost sample");
        true
    }

    /// Feed a lap completion for `slot`.
    ///
    /// Returns the finalized lap when one was being recorded.
    pub fn on_lap_completed(
        &self,
        slot: SlotId,
        lap_time: Duration,
        event_time: SystemTime,
    ) -> Option<RecordedLap> {
        let mut recorder = self.slots[slot.index()].lock();
        match recorder.state {
            RecordingState::Idle => None,
            RecordingState::WaitingForLapStart => {
                debug!(%slot, "Lap start reached, recording");
                Self::begin_lap(&mut recorder, event_time);
                None
            }
            RecordingState::Recording => {
                let samples = std::mem::take(&mut recorder.samples);
                let lap = RecordedLap::new(slot, event_time, lap_time, samples);
                recorder.laps_recorded += 1;
                info!(
                    %slot,
                    lap = recorder.laps_recorded,
                    of = recorder.target_laps,
                    samples = lap.sample_count(),
                    seconds = lap_time.as_secs_f64(),
                    "Ghost lap recorded"
                );

                if recorder.laps_recorded >= recorder.target_laps {
                    recorder.clear();
                } else {
                    Self::begin_lap(&mut recorder, event_time);
                }
                Some(lap)
            }
        }
    }

    fn begin_lap(recorder: &mut SlotRecorder, lap_start: SystemTime) {
        recorder.state = RecordingState::Recording;
        recorder.lap_start = Some(lap_start);
        recorder.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> SlotId {
        SlotId::new(2).unwrap()
    }

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }

    fn lap_time(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn scaling_by_power_multiplier() {
        assert_eq!(scale_throttle(63, 63), 63);
        assert_eq!(scale_throttle(63, 0), 0);
        assert_eq!(scale_throttle(40, 63), 40);
        assert_eq!(scale_throttle(63, 32), 32);
        assert_eq!(scale_throttle(200, 200), 63);
    }

    #[test]
    fn samples_are_dropped_unless_recording() {
        let recorder = GhostRecorder::new();
        assert!(!recorder.record_sample(slot(), 10, at(0)));

        recorder.start_recording(slot(), 1);
        assert_eq!(recorder.state(slot()), RecordingState::WaitingForLapStart);
        assert!(!recorder.record_sample(slot(), 10, at(0)));
        assert_eq!(recorder.progress(slot()).buffered_samples, 0);
    }

    #[test]
    fn first_crossing_starts_the_lap_without_finalizing() {
        let recorder = GhostRecorder::new();
        recorder.start_recording(slot(), 1);

        assert!(recorder.on_lap_completed(slot(), lap_time(9), at(1_000)).is_none());
        assert_eq!(recorder.state(slot()), RecordingState::Recording);

        assert!(recorder.record_sample(slot(), 20, at(1_250)));
        assert!(recorder.record_sample(slot(), 30, at(1_500)));
        let lap = recorder.on_lap_completed(slot(), lap_time(5), at(6_000)).unwrap();

        assert_eq!(lap.slot, slot());
        assert_eq!(lap.recorded_at, at(6_000));
        assert_eq!(lap.lap_time, lap_time(5));
        assert_eq!(
            lap.samples,
            vec![
                GhostSample { elapsed_ms: 250, throttle: 20 },
                GhostSample { elapsed_ms: 500, throttle: 30 },
            ]
        );
        assert_eq!(recorder.state(slot()), RecordingState::Idle);
    }

    #[test]
    fn multi_lap_session_records_exactly_n_laps() {
        let recorder = GhostRecorder::new();
        recorder.start_recording(slot(), 3);
        recorder.on_lap_completed(slot(), lap_time(1), at(0));

        let mut laps = Vec::new();
        for lap in 1..=3u64 {
            recorder.record_sample(slot(), lap as u8, at(lap * 5_000 - 2_500));
            assert_eq!(recorder.state(slot()), RecordingState::Recording);
            let recorded = recorder.on_lap_completed(slot(), lap_time(5), at(lap * 5_000));
            laps.extend(recorded);
            if lap < 3 {
                assert_eq!(recorder.state(slot()), RecordingState::Recording);
                assert_eq!(recorder.progress(slot()).laps_recorded, lap as u32);
            }
        }

        assert_eq!(laps.len(), 3);
        assert_eq!(recorder.state(slot()), RecordingState::Idle);
        for (i, lap) in laps.iter().enumerate() {
            assert_eq!(lap.samples, vec![GhostSample { elapsed_ms: 2_500, throttle: i as u8 + 1 }]);
        }
        assert!(recorder.on_lap_completed(slot(), lap_time(5), at(20_000)).is_none());
    }

    #[test]
    fn stop_discards_open_buffer() {
        let recorder = GhostRecorder::new();
        recorder.start_recording(slot(), 2);
        recorder.on_lap_completed(slot(), lap_time(1), at(0));
        recorder.record_sample(slot(), 10, at(100));
        recorder.record_sample(slot(), 11, at(200));

        assert_eq!(recorder.stop_recording(slot()), 2);
        assert_eq!(recorder.state(slot()), RecordingState::Idle);
        assert!(recorder.on_lap_completed(slot(), lap_time(5), at(5_000)).is_none());
    }

    #[test]
    fn continue_recording_skips_the_wait() {
        let recorder = GhostRecorder::new();
        recorder.continue_recording(slot(), at(1_000));
        assert_eq!(recorder.state(slot()), RecordingState::Recording);
        assert!(recorder.record_sample(slot(), 5, at(1_100)));
        let lap = recorder.on_lap_completed(slot(), lap_time(4), at(5_000)).unwrap();
        assert_eq!(lap.sample_count(), 1);
        assert_eq!(recorder.state(slot()), RecordingState::Idle);
    }

    #[test]
    fn samples_before_lap_start_clamp_to_zero() {
        let recorder = GhostRecorder::new();
        recorder.continue_recording(slot(), at(1_000));
        recorder.record_sample(slot(), 5, at(900));
        assert_eq!(recorder.progress(slot()).buffered_samples, 1);
        let lap = recorder.on_lap_completed(slot(), lap_time(1), at(2_000)).unwrap();
        assert_eq!(lap.samples[0].elapsed_ms, 0);
    }

    #[test]
    fn slots_record_independently() {
        let recorder = GhostRecorder::new();
        let other = SlotId::new(5).unwrap();
        recorder.start_recording(slot(), 1);
        recorder.on_lap_completed(slot(), lap_time(1), at(0));
        assert_eq!(recorder.state(other), RecordingState::Idle);
        assert!(!recorder.record_sample(other, 10, at(10)));
    }
}
