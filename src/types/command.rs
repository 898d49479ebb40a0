//! Command packet building blocks

use serde::{Deserialize, Serialize};

use crate::{PowerbaseError, Result};

/// Largest power multiplier representable in the 6-bit field.
pub const MAX_MULTIPLIER: u8 = 0x3F;

const GHOST_MODE_BIT: u8 = 1 << 7;
const BIT_SIX: u8 = 1 << 6;

/// Command kind carried in byte 0 of every command packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    /// Track power off, race timer stopped.
    #[default]
    PowerOffStopped = 0,
    /// Track power off, race timer still running.
    PowerOffTimerTicking = 1,
    /// Track power on, waiting for the race start trigger.
    PowerOnTrigger = 2,
    /// Track power on, racing.
    PowerOnRacing = 3,
    /// Track power on, race timer halted.
    PowerOnTimerHalt = 4,
    /// Power off and reboot the powerbase controller.
    Reboot = 5,
}

impl CommandKind {
    /// Whether this kind keeps the track powered.
    pub fn is_powered(self) -> bool {
        matches!(
            self,
            CommandKind::PowerOnTrigger | CommandKind::PowerOnRacing | CommandKind::PowerOnTimerHalt
        )
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = PowerbaseError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CommandKind::PowerOffStopped),
            1 => Ok(CommandKind::PowerOffTimerTicking),
            2 => Ok(CommandKind::PowerOnTrigger),
            3 => Ok(CommandKind::PowerOnRacing),
            4 => Ok(CommandKind::PowerOnTimerHalt),
            5 => Ok(CommandKind::Reboot),
            other => Err(PowerbaseError::decode_error(
                "command kind",
                format!("unknown command kind {other}"),
            )),
        }
    }
}

/// Per-slot power byte: `(ghost << 7) | (bit_six << 6) | multiplier`.
///
/// In ghost mode the multiplier is driven directly as a throttle value
/// instead of scaling the hand controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PowerByte {
    multiplier: u8,
    ghost_mode: bool,
    bit_six: bool,
}

impl PowerByte {
    /// Build a power byte. Multipliers above 63 are clamped.
    pub fn new(multiplier: u8, ghost_mode: bool, bit_six: bool) -> Self {
        Self { multiplier: multiplier.min(MAX_MULTIPLIER), ghost_mode, bit_six }
    }

    pub fn multiplier(self) -> u8 {
        self.multiplier
    }

    pub fn ghost_mode(self) -> bool {
        self.ghost_mode
    }

    /// Opaque flag passed through to the powerbase unchanged.
    pub fn bit_six(self) -> bool {
        self.bit_six
    }

    pub fn with_multiplier(self, multiplier: u8) -> Self {
        Self::new(multiplier, self.ghost_mode, self.bit_six)
    }

    pub fn with_ghost_mode(self, ghost_mode: bool) -> Self {
        Self { ghost_mode, ..self }
    }

    pub fn with_bit_six(self, bit_six: bool) -> Self {
        Self { bit_six, ..self }
    }

    /// Encode to the wire byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = self.multiplier & MAX_MULTIPLIER;
        if self.ghost_mode {
            byte |= GHOST_MODE_BIT;
        }
        if self.bit_six {
            byte |= BIT_SIX;
        }
        byte
    }

    /// Decode a wire byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            multiplier: byte & MAX_MULTIPLIER,
            ghost_mode: byte & GHOST_MODE_BIT != 0,
            bit_six: byte & BIT_SIX != 0,
        }
    }
}

/// Everything a command packet says about one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCommand {
    pub power: PowerByte,
    pub rumble: u8,
    pub brake: u8,
    pub kers: bool,
}

impl SlotCommand {
    /// A slot command with only the power multiplier set.
    pub fn with_power(multiplier: u8) -> Self {
        Self { power: PowerByte::new(multiplier, false, false), ..Self::default() }
    }
}
