//! Slot addressing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PowerbaseError, Result};

/// Number of independently addressable slots on a powerbase.
pub const SLOT_COUNT: usize = 6;

/// A validated slot id in `1..=6`.
///
/// Slot ids appear 1-based on the wire and in the UI; [`SlotId::index`] gives
/// the 0-based position used for per-slot arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id, rejecting values outside `1..=6`.
    pub fn new(id: u8) -> Result<Self> {
        if (1..=SLOT_COUNT as u8).contains(&id) {
            Ok(Self(id))
        } else {
            Err(PowerbaseError::InvalidSlot { slot: id })
        }
    }

    /// Slot id from a 0-based array index.
    pub fn from_index(index: usize) -> Option<Self> {
        (index < SLOT_COUNT).then(|| Self(index as u8 + 1))
    }

    /// The 1-based wire value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The 0-based index into per-slot arrays.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Iterate over all six slots in order.
    pub fn all() -> impl Iterator<Item = SlotId> {
        (1..=SLOT_COUNT as u8).map(SlotId)
    }

    /// Iterate over the first `count` slots (clamped to six).
    pub fn first(count: u8) -> impl Iterator<Item = SlotId> {
        (1..=count.min(SLOT_COUNT as u8)).map(SlotId)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = PowerbaseError;

    fn try_from(value: u8) -> Result<Self> {
        SlotId::new(value)
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> Self {
        slot.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
