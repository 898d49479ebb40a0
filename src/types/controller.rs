//! Hand controller input decoding

use serde::{Deserialize, Serialize};

/// Throttle occupies the low six bits of a controller byte.
pub const THROTTLE_MASK: u8 = 0x3F;
/// Brake button bit.
pub const BRAKE_BIT: u8 = 1 << 6;
/// Lane change button bit.
pub const LANE_CHANGE_BIT: u8 = 1 << 7;

/// One slot's hand controller state as reported by a throttle notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInput {
    /// Trigger position, 0–63.
    pub throttle: u8,
    /// Brake button held.
    pub brake: bool,
    /// Lane change button held.
    pub lane_change: bool,
}

impl ControllerInput {
    /// Decompose a raw controller byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            throttle: byte & THROTTLE_MASK,
            brake: byte & BRAKE_BIT != 0,
            lane_change: byte & LANE_CHANGE_BIT != 0,
        }
    }

    /// Recompose the raw controller byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = self.throttle & THROTTLE_MASK;
        if self.brake {
            byte |= BRAKE_BIT;
        }
        if self.lane_change {
            byte |= LANE_CHANGE_BIT;
        }
        byte
    }
}
