//! Positioning Sequence Stages
//!
//! The carriage positioning handshake advances through a linear state
//! machine. There are no backward transitions: a sequence either reaches
//! `Completed`, or leaves through `Error` (timeout or register fault), or is
//! cancelled in place after cleanup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status-bit poll period during positioning waits
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the PLC gets to raise positioning-request after force-positioning
pub const REQUEST_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the carriage gets to reach position after permission is granted
pub const COMPLETION_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Step of the positioning state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositioningStage {
    /// Sequence entered; nothing written yet
    Started,
    /// All positioning parameter registers written
    ParametersSet,
    /// Force-positioning bit raised
    ForcePositioningSet,
    /// The PLC raised positioning-request
    PlcRequestReceived,
    /// Force-positioning bit cleared again
    ForcePositioningReset,
    /// Positioning-permit bit raised; the carriage may move
    PermissionGranted,
    /// The PLC raised system-positioned
    SystemPositioned,
    /// Positioning-permit cleared; sequence done
    Completed,
    /// The sequence failed; reachable from any non-terminal stage
    Error,
}

impl PositioningStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositioningStage::Completed | PositioningStage::Error)
    }
}
