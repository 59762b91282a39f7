//! Register-Backed Parameter Groups
//!
//! Parameter groups are written wholesale: there are no partial-field
//! semantics on the wire, so each group knows its register layout and encodes
//! itself as a block. The structs are plain immutable value records: a
//! changed parameter means a new record and a new group write.

use super::registers::*;
use serde::{Deserialize, Serialize};

/// Carriage positioning parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositioningSettings {
    /// Retreat distance after photography, mm
    pub retreat_distance: u16,
    /// Time allowed for the zero-positioning move, ms
    pub zero_positioning_time: u16,
    /// Estimated distance to home, mm
    pub estimated_home_distance: u16,
    /// Settle time on direction change, ms
    pub direction_change_time: u16,
    /// Carriage velocity, mm/s
    pub velocity: u16,
    /// Minimum admissible camera-box distance, mm
    pub min_camera_box_distance: u16,
    /// Target camera-box distance, mm
    pub target_camera_box_distance: u16,
}

impl PositioningSettings {
    /// Register layout of the group, in write order
    pub const REGISTERS: [u16; 7] = [
        RETREAT_DISTANCE_REGISTER,
        ZERO_POSITIONING_TIME_REGISTER,
        ESTIMATED_HOME_DISTANCE_REGISTER,
        DIRECTION_CHANGE_TIME_REGISTER,
        VELOCITY_REGISTER,
        MIN_CAMERA_BOX_DISTANCE_REGISTER,
        TARGET_CAMERA_BOX_DISTANCE_REGISTER,
    ];

    pub fn to_words(&self) -> [u16; 7] {
        [
            self.retreat_distance,
            self.zero_positioning_time,
            self.estimated_home_distance,
            self.direction_change_time,
            self.velocity,
            self.min_camera_box_distance,
            self.target_camera_box_distance,
        ]
    }

    pub fn from_words(words: [u16; 7]) -> Self {
        Self {
            retreat_distance: words[0],
            zero_positioning_time: words[1],
            estimated_home_distance: words[2],
            direction_change_time: words[3],
            velocity: words[4],
            min_camera_box_distance: words[5],
            target_camera_box_distance: words[6],
        }
    }
}

/// Box geometry parameters for the current work order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxWorkSettings {
    /// Box height, mm
    pub box_height: u16,
    /// Layers per box
    pub layers_quantity: u16,
}

impl BoxWorkSettings {
    pub const REGISTERS: [u16; 2] = [BOX_HEIGHT_REGISTER, LAYERS_QUANTITY_REGISTER];

    pub fn to_words(&self) -> [u16; 2] {
        [self.box_height, self.layers_quantity]
    }

    pub fn from_words(words: [u16; 2]) -> Self {
        Self {
            box_height: words[0],
            layers_quantity: words[1],
        }
    }
}

/// Ring light and camera timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingSettings {
    /// Light level, percent
    pub light_level: u16,
    /// Light-on delay, ms
    pub light_delay: u16,
    /// Light exposure time, ms
    pub light_exposure: u16,
    /// Camera trigger delay, ms
    pub camera_delay: u16,
    /// Camera exposure time, ms
    pub camera_exposure: u16,
}

impl LightingSettings {
    pub const REGISTERS: [u16; 5] = [
        LIGHT_LEVEL_REGISTER,
        LIGHT_DELAY_REGISTER,
        LIGHT_EXPOSURE_REGISTER,
        CAMERA_DELAY_REGISTER,
        CAMERA_EXPOSURE_REGISTER,
    ];

    pub fn to_words(&self) -> [u16; 5] {
        [
            self.light_level,
            self.light_delay,
            self.light_exposure,
            self.camera_delay,
            self.camera_exposure,
        ]
    }

    pub fn from_words(words: [u16; 5]) -> Self {
        Self {
            light_level: words[0],
            light_delay: words[1],
            light_exposure: words[2],
            camera_delay: words[3],
            camera_exposure: words[4],
        }
    }
}
