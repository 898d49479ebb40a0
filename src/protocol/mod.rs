//! Powerbase wire protocol (codec)
//!
//! This module builds the packets the powerbase consumes and decodes the
//! notifications it emits:
//!
//! 1. **Command packet** (20 bytes) - command kind, per-slot power, rumble,
//!    brake and KERS bitfield, re-sent by the heartbeat
//! 2. **Throttle profile blocks** (6 x 17 bytes per slot) - the 96-entry
//!    controller-to-motor lookup table
//! 3. **Slot notifications** - finish line crossing timestamps
//! 4. **Throttle notifications** - hand controller bytes for all slots
//! 5. **Track notifications** - track sensor events
//!
//! All multi-byte fields are little-endian. Decoding never panics: short or
//! malformed payloads are returned as [`PowerbaseError::Decode`] so the
//! notification path can log and drop them.

pub mod command;
pub mod notification;
pub mod throttle_profile;

pub use command::CommandPacket;
pub use notification::{
    PowerbaseMessage, SlotNotification, ThrottleNotification, TrackNotification,
    decode_notification,
};
pub use throttle_profile::{ThrottleCurve, ThrottleProfile, ThrottleProfileBlock};

use crate::{PowerbaseError, Result};

pub(crate) fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data.get(offset..offset + 4).ok_or_else(|| {
        PowerbaseError::decode_error(
            "Integer parsing",
            format!(
                "Insufficient data for u32 at offset {} (need 4 bytes, have {})",
                offset,
                data.len().saturating_sub(offset)
            ),
        )
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn ensure_len(data: &[u8], min_len: usize, context: &str) -> Result<()> {
    if data.len() < min_len {
        return Err(PowerbaseError::decode_error(
            context,
            format!("payload too short: need {} bytes, have {}", min_len, data.len()),
        ));
    }
    Ok(())
}
