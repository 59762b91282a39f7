//! PLC Register Map
//!
//! Addresses and bit assignments of the positioning PLC. The map is wire
//! compatible with the carriage firmware; renumbering anything here breaks
//! the physical line.

/// Command register (holding, read/write)
pub const COMMAND_REGISTER: u16 = 100;
/// Status register (input, read-only)
pub const STATUS_REGISTER: u16 = 101;
/// Cycle step number (holding)
pub const CYCLE_STEP_REGISTER: u16 = 102;
/// Carriage retreat distance, mm (holding)
pub const RETREAT_DISTANCE_REGISTER: u16 = 103;
/// Zero-positioning time, ms (holding)
pub const ZERO_POSITIONING_TIME_REGISTER: u16 = 104;
/// Estimated distance to home, mm (holding)
pub const ESTIMATED_HOME_DISTANCE_REGISTER: u16 = 105;
/// Direction-change settle time, ms (holding)
pub const DIRECTION_CHANGE_TIME_REGISTER: u16 = 106;
/// Carriage velocity, mm/s (holding)
pub const VELOCITY_REGISTER: u16 = 107;
/// Minimum camera-box distance, mm (holding)
pub const MIN_CAMERA_BOX_DISTANCE_REGISTER: u16 = 108;
/// Target camera-box distance, mm (holding)
pub const TARGET_CAMERA_BOX_DISTANCE_REGISTER: u16 = 109;
/// Box height, mm (holding)
pub const BOX_HEIGHT_REGISTER: u16 = 110;
/// Layers per box (holding)
pub const LAYERS_QUANTITY_REGISTER: u16 = 111;
/// Light level, percent (holding)
pub const LIGHT_LEVEL_REGISTER: u16 = 112;
/// Light-on delay, ms (holding)
pub const LIGHT_DELAY_REGISTER: u16 = 113;
/// Light exposure time, ms (holding)
pub const LIGHT_EXPOSURE_REGISTER: u16 = 114;
/// Camera trigger delay, ms (holding)
pub const CAMERA_DELAY_REGISTER: u16 = 115;
/// Camera exposure time, ms (holding)
pub const CAMERA_EXPOSURE_REGISTER: u16 = 116;
/// Non-fatal condition bitmask (input, read-only)
pub const NON_FATAL_ERROR_REGISTER: u16 = 120;
/// Fatal condition bitmask (input, read-only)
pub const FATAL_ERROR_REGISTER: u16 = 121;
/// Fatal-final condition bitmask (input, read-only)
pub const FATAL_FINAL_ERROR_REGISTER: u16 = 122;

/// Bits of the command register
pub mod command {
    /// Set by the PLC to request the handshake; the PC answers by clearing it
    pub const CONNECT_HANDSHAKE: u16 = 1 << 0;
    /// Enables PC control of the carriage
    pub const CONNECT_CONTROL_ENABLE: u16 = 1 << 1;
    /// Set by the PC in answer to the handshake; the PLC watchdog clears it
    pub const PLC_ACTIVE: u16 = 1 << 2;
    /// Demands a positioning cycle regardless of carriage state
    pub const FORCE_POSITIONING: u16 = 1 << 3;
    /// Grants the PLC permission to move the carriage
    pub const POSITIONING_PERMIT: u16 = 1 << 4;
    /// Starts the configured cycle step
    pub const CYCLE_STEP_START: u16 = 1 << 5;
    /// Photography finished; the carriage may move again
    pub const PHOTO_TAKEN: u16 = 1 << 6;
    /// Operator pedal press, forwarded to the PLC
    pub const START_PEDAL: u16 = 1 << 7;
    /// Applies the written camera-box distance parameters
    pub const APPLY_DISTANCE: u16 = 1 << 8;
    /// Holds the ring light on continuously
    pub const CONTINUOUS_LIGHT: u16 = 1 << 9;
}

/// Bits of the status register
pub mod status {
    /// The PLC asks for a positioning cycle
    pub const POSITIONING_REQUEST: u16 = 1 << 0;
    /// The carriage reached the target position
    pub const SYSTEM_POSITIONED: u16 = 1 << 1;
}

/// Apply one bit of a 16-bit register value
pub fn with_bit(value: u16, mask: u16, on: bool) -> u16 {
    if on {
        value | mask
    } else {
        value & !mask
    }
}

/// Whether the masked bit is set
pub fn has_bit(value: u16, mask: u16) -> bool {
    value & mask != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_bit_round_trips() {
        let value = with_bit(0, command::FORCE_POSITIONING, true);
        assert!(has_bit(value, command::FORCE_POSITIONING));
        assert_eq!(with_bit(value, command::FORCE_POSITIONING, false), 0);
    }

    #[test]
    fn with_bit_leaves_other_bits_alone() {
        let value = command::CONNECT_HANDSHAKE | command::CONTINUOUS_LIGHT;
        let value = with_bit(value, command::CONNECT_HANDSHAKE, false);
        assert!(!has_bit(value, command::CONNECT_HANDSHAKE));
        assert!(has_bit(value, command::CONTINUOUS_LIGHT));
    }
}
