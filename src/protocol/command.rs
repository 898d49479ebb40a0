//! Command packet encoding
//!
//! Layout (20 bytes):
//!
//! | bytes  | field                                  |
//! |--------|----------------------------------------|
//! | 0      | command kind                           |
//! | 1–6    | power byte for slots 1–6               |
//! | 7–12   | rumble for slots 1–6                   |
//! | 13–18  | brake for slots 1–6                    |
//! | 19     | KERS bitfield, bit n = slot n+1        |

use crate::types::{CommandKind, PowerByte, SLOT_COUNT, SlotCommand, SlotId};
use crate::{PowerbaseError, Result};

const POWER_OFFSET: usize = 1;
const RUMBLE_OFFSET: usize = POWER_OFFSET + SLOT_COUNT;
const BRAKE_OFFSET: usize = RUMBLE_OFFSET + SLOT_COUNT;
const KERS_OFFSET: usize = BRAKE_OFFSET + SLOT_COUNT;

/// A complete command for the powerbase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandPacket {
    kind: CommandKind,
    slots: [SlotCommand; SLOT_COUNT],
}

impl CommandPacket {
    /// Encoded packet length in bytes.
    pub const LEN: usize = 20;

    /// A packet of the given kind with every slot zeroed.
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, slots: [SlotCommand::default(); SLOT_COUNT] }
    }

    /// The all-zero power-off packet.
    pub fn power_off() -> Self {
        Self::new(CommandKind::PowerOffStopped)
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    pub fn slot(&self, slot: SlotId) -> &SlotCommand {
        &self.slots[slot.index()]
    }

    pub fn slot_mut(&mut self, slot: SlotId) -> &mut SlotCommand {
        &mut self.slots[slot.index()]
    }

    /// Builder-style replacement of one slot's command.
    pub fn with_slot(mut self, slot: SlotId, command: SlotCommand) -> Self {
        self.slots[slot.index()] = command;
        self
    }

    /// Set the power multiplier of every slot, keeping their flags.
    pub fn set_all_power(&mut self, multiplier: u8) {
        for command in &mut self.slots {
            command.power = command.power.with_multiplier(multiplier);
        }
    }

    /// A copy of this packet with all ghost-mode flags and power cleared.
    pub fn without_ghosts(&self) -> Self {
        let mut packet = *self;
        for command in &mut packet.slots {
            command.power = PowerByte::new(0, false, command.power.bit_six());
        }
        packet
    }

    /// Serialize to the 20-byte wire format.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.kind as u8;

        let mut kers = 0u8;
        for (i, command) in self.slots.iter().enumerate() {
            bytes[POWER_OFFSET + i] = command.power.to_byte();
            bytes[RUMBLE_OFFSET + i] = command.rumble;
            bytes[BRAKE_OFFSET + i] = command.brake;
            if command.kers {
                kers |= 1 << i;
            }
        }
        bytes[KERS_OFFSET] = kers;
        bytes
    }

    /// Parse a 20-byte command packet.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::LEN {
            return Err(PowerbaseError::decode_error(
                "command packet",
                format!("expected {} bytes, got {}", Self::LEN, data.len()),
            ));
        }

        let kind = CommandKind::try_from(data[0])?;
        let kers = data[KERS_OFFSET];
        let slots = std::array::from_fn(|i| SlotCommand {
            power: PowerByte::from_byte(data[POWER_OFFSET + i]),
            rumble: data[RUMBLE_OFFSET + i],
            brake: data[BRAKE_OFFSET + i],
            kers: kers & (1 << i) != 0,
        });

        Ok(Self { kind, slots })
    }
}
