//! Recorded laps and their storage seam

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::SlotId;

/// One throttle sample within a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostSample {
    /// Milliseconds since the lap started.
    pub elapsed_ms: u32,
    /// Power-scaled throttle value, 0–63.
    pub throttle: u8,
}

/// A finalized, replayable lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedLap {
    pub slot: SlotId,
    /// Wall-clock time of the crossing that finished the lap.
    pub recorded_at: SystemTime,
    pub lap_time: Duration,
    pub samples: Vec<GhostSample>,
    pub name: String,
}

impl RecordedLap {
    pub fn new(
        slot: SlotId,
        recorded_at: SystemTime,
        lap_time: Duration,
        samples: Vec<GhostSample>,
    ) -> Self {
        let name = default_lap_name(slot, lap_time);
        Self { slot, recorded_at, lap_time, samples, name }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Time of the last sample.
    pub fn duration(&self) -> Duration {
        self.samples
            .last()
            .map(|s| Duration::from_millis(u64::from(s.elapsed_ms)))
            .unwrap_or_default()
    }

    /// Throttle at `elapsed`, linearly interpolated between the surrounding
    /// samples. Before the first sample the first value is used, past the
    /// last sample the last value. `None` for an empty lap.
    pub fn throttle_at(&self, elapsed: Duration) -> Option<u8> {
        let first = self.samples.first()?;
        let elapsed_ms = elapsed.as_millis().min(u128::from(u32::MAX)) as u32;

        if elapsed_ms <= first.elapsed_ms {
            return Some(first.throttle);
        }

        // Index of the first sample strictly after `elapsed_ms`.
        let next = self.samples.partition_point(|s| s.elapsed_ms <= elapsed_ms);
        let Some(after) = self.samples.get(next) else {
            return self.samples.last().map(|s| s.throttle);
        };
        let before = &self.samples[next - 1];

        let span = f64::from(after.elapsed_ms - before.elapsed_ms);
        if span == 0.0 {
            return Some(after.throttle);
        }
        let t = f64::from(elapsed_ms - before.elapsed_ms) / span;
        let (from, to) = (f64::from(before.throttle), f64::from(after.throttle));
        let value = from + t * (to - from);
        Some(value.round().clamp(0.0, 63.0) as u8)
    }
}

/// Display name used for newly recorded laps.
pub fn default_lap_name(slot: SlotId, lap_time: Duration) -> String {
    format!("Slot {} – {:.2}s", slot, lap_time.as_secs_f64())
}

/// Persistence for recorded laps.
#[async_trait::async_trait]
pub trait LapStore: Send + Sync + 'static {
    /// All stored laps for one slot.
    async fn load(&self, slot: SlotId) -> Result<Vec<RecordedLap>>;

    /// Replace the stored laps with `laps`.
    async fn save(&self, laps: &[RecordedLap]) -> Result<()>;
}

/// A [`LapStore`] kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryLapStore {
    laps: Mutex<Vec<RecordedLap>>,
}

impl InMemoryLapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.laps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl LapStore for InMemoryLapStore {
    async fn load(&self, slot: SlotId) -> Result<Vec<RecordedLap>> {
        Ok(self.laps.lock().iter().filter(|lap| lap.slot == slot).cloned().collect())
    }

    async fn save(&self, laps: &[RecordedLap]) -> Result<()> {
        *self.laps.lock() = laps.to_vec();
        Ok(())
    }
}
