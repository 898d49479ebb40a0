//! Notification decoding
//!
//! Slot notification layout:
//!
//! | bytes  | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | status                                  |
//! | 1      | slot id (1–6)                           |
//! | 2–5    | lane 1 entry tick (u32 LE, centiseconds)|
//! | 6–9    | lane 2 entry tick                       |
//! | 10–13  | lane 1 exit tick (optional)             |
//! | 14–17  | lane 2 exit tick (optional)             |
//!
//! Throttle notifications carry a header byte followed by one controller byte
//! per slot. Track notifications carry a status byte, a sensor id and the
//! tick at which the sensor fired.

use tracing::trace;

use super::{ensure_len, parse_u32_le};
use crate::transport::Endpoint;
use crate::types::{ControllerInput, SLOT_COUNT, SlotId};
use crate::{PowerbaseError, Result};

/// Minimum slot notification length (status, slot id, two entry ticks).
pub const SLOT_NOTIFICATION_MIN_LEN: usize = 10;
/// Slot notification length when exit ticks are present.
pub const SLOT_NOTIFICATION_FULL_LEN: usize = 18;
/// Throttle notification length (header plus six controller bytes).
pub const THROTTLE_NOTIFICATION_LEN: usize = 1 + SLOT_COUNT;
/// Minimum track notification length.
pub const TRACK_NOTIFICATION_MIN_LEN: usize = 6;

/// A finish line crossing reported for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotNotification {
    pub status: u8,
    pub slot: SlotId,
    pub lane1_entry: u32,
    pub lane2_entry: u32,
    pub lane1_exit: Option<u32>,
    pub lane2_exit: Option<u32>,
}

impl SlotNotification {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        ensure_len(payload, SLOT_NOTIFICATION_MIN_LEN, "slot notification")?;

        let slot = SlotId::new(payload[1]).map_err(|_| {
            PowerbaseError::decode_error(
                "slot notification",
                format!("slot id {} out of range", payload[1]),
            )
        })?;
        let lane1_entry = parse_u32_le(payload, 2)?;
        let lane2_entry = parse_u32_le(payload, 6)?;

        let (lane1_exit, lane2_exit) = if payload.len() >= SLOT_NOTIFICATION_FULL_LEN {
            (Some(parse_u32_le(payload, 10)?), Some(parse_u32_le(payload, 14)?))
        } else {
            (None, None)
        };

        Ok(Self { status: payload[0], slot, lane1_entry, lane2_entry, lane1_exit, lane2_exit })
    }

    /// The most recent entry tick across both lanes.
    pub fn max_entry_tick(&self) -> u32 {
        self.lane1_entry.max(self.lane2_entry)
    }
}

/// Hand controller state for all slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleNotification {
    pub header: u8,
    pub inputs: [ControllerInput; SLOT_COUNT],
}

impl ThrottleNotification {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        ensure_len(payload, THROTTLE_NOTIFICATION_LEN, "throttle notification")?;
        let inputs = std::array::from_fn(|i| ControllerInput::from_byte(payload[1 + i]));
        Ok(Self { header: payload[0], inputs })
    }

    pub fn input(&self, slot: SlotId) -> ControllerInput {
        self.inputs[slot.index()]
    }
}

/// A track sensor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackNotification {
    pub status: u8,
    pub sensor_id: u8,
    pub tick: u32,
}

impl TrackNotification {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        ensure_len(payload, TRACK_NOTIFICATION_MIN_LEN, "track notification")?;
        Ok(Self { status: payload[0], sensor_id: payload[1], tick: parse_u32_le(payload, 2)? })
    }
}

/// A decoded notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerbaseMessage {
    Slot(SlotNotification),
    Throttle(ThrottleNotification),
    Track(TrackNotification),
}

/// Decode a notification by the endpoint it arrived on.
pub fn decode_notification(endpoint: Endpoint, payload: &[u8]) -> Result<PowerbaseMessage> {
    trace!(?endpoint, len = payload.len(), "Decoding notification");
    match endpoint {
        Endpoint::Slot => SlotNotification::decode(payload).map(PowerbaseMessage::Slot),
        Endpoint::Throttle => ThrottleNotification::decode(payload).map(PowerbaseMessage::Throttle),
        Endpoint::Track => TrackNotification::decode(payload).map(PowerbaseMessage::Track),
        other => Err(PowerbaseError::decode_error(
            "notification",
            format!("endpoint {other:?} does not emit notifications"),
        )),
    }
}
