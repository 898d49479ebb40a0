//! Core value types shared by the codec and the control components.
//!
//! - [`SlotId`] is a validated 1-based slot address
//! - [`CommandKind`], [`PowerByte`] and [`SlotCommand`] describe what a command
//!   packet asks of the powerbase
//! - [`ControllerInput`] is one slot's decoded hand controller byte
//!
//! ```rust
//! use powerbase::types::{PowerByte, SlotId};
//!
//! let slot = SlotId::new(3).unwrap();
//! assert_eq!(slot.index(), 2);
//!
//! let power = PowerByte::new(40, true, false);
//! assert_eq!(power.to_byte(), 0x80 | 40);
//! ```

mod command;
mod controller;
mod slot;

pub use command::{CommandKind, MAX_MULTIPLIER, PowerByte, SlotCommand};
pub use controller::{BRAKE_BIT, ControllerInput, LANE_CHANGE_BIT, THROTTLE_MASK};
pub use slot::{SLOT_COUNT, SlotId};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn power_byte_round_trip_recovers_fields(
            multiplier in 0u8..=63,
            ghost_mode in any::<bool>(),
            bit_six in any::<bool>(),
        ) {
            let byte = PowerByte::new(multiplier, ghost_mode, bit_six).to_byte();
            let decoded = PowerByte::from_byte(byte);
            prop_assert_eq!(decoded.multiplier(), multiplier);
            prop_assert_eq!(decoded.ghost_mode(), ghost_mode);
            prop_assert_eq!(decoded.bit_six(), bit_six);
        }

        #[test]
        fn multiplier_never_exceeds_six_bits(multiplier in any::<u8>()) {
            let power = PowerByte::new(multiplier, false, false);
            prop_assert!(power.multiplier() <= MAX_MULTIPLIER);
            prop_assert_eq!(power.to_byte() & 0xC0, 0);
        }

        #[test]
        fn controller_byte_round_trip(byte in any::<u8>()) {
            prop_assert_eq!(ControllerInput::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn power_byte_layout() {
        assert_eq!(PowerByte::new(0, true, false).to_byte(), 0x80);
        assert_eq!(PowerByte::new(0, false, true).to_byte(), 0x40);
        assert_eq!(PowerByte::new(63, true, true).to_byte(), 0xFF);
        assert_eq!(PowerByte::new(200, false, false).multiplier(), 63);
    }

    #[test]
    fn controller_input_bits() {
        let input = ControllerInput::from_byte(0b1100_1010);
        assert_eq!(input.throttle, 0b00_1010);
        assert!(input.brake);
        assert!(input.lane_change);

        let idle = ControllerInput::from_byte(0x3F);
        assert_eq!(idle.throttle, 63);
        assert!(!idle.brake && !idle.lane_change);
    }

    #[test]
    fn slot_ids_are_validated() {
        assert!(SlotId::new(0).is_err());
        assert!(SlotId::new(7).is_err());
        assert_eq!(SlotId::new(1).unwrap().index(), 0);
        assert_eq!(SlotId::new(6).unwrap().index(), 5);
        assert_eq!(SlotId::all().count(), SLOT_COUNT);
        assert_eq!(SlotId::first(4).map(SlotId::get).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(SlotId::from_index(5), SlotId::new(6).ok());
        assert_eq!(SlotId::from_index(6), None);
    }

    #[test]
    fn command_kind_wire_values() {
        for value in 0u8..=5 {
            let kind = CommandKind::try_from(value).unwrap();
            assert_eq!(kind as u8, value);
        }
        assert!(CommandKind::try_from(6).is_err());
        assert!(CommandKind::PowerOnRacing.is_powered());
        assert!(!CommandKind::PowerOffTimerTicking.is_powered());
        assert!(!CommandKind::Reboot.is_powered());
    }

    #[test]
    fn slot_id_serde_rejects_out_of_range() {
        let slot: SlotId = serde_yaml_ng::from_str("4").unwrap();
        assert_eq!(slot.get(), 4);
        assert!(serde_yaml_ng::from_str::<SlotId>("9").is_err());
    }
}
