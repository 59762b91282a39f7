//! PLC Controller Events
//!
//! Events emitted by the protocol controller for the orchestration layer,
//! delivered over an unbounded channel in emission order.

use super::faults::PlcErrors;
use super::positioning::PositioningStage;

/// Controller event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcEvent {
    /// The underlying device gained or lost its session
    ConnectionChanged {
        /// Whether a live session is held
        connected: bool,
    },

    /// The positioning sequence advanced one stage
    StageChanged {
        /// New stage
        stage: PositioningStage,
    },

    /// An error poll found at least one reported condition
    ErrorsReceived {
        /// Decoded fault snapshot
        errors: PlcErrors,
    },

    /// The underlying device failed terminally
    FatalError {
        /// Human-readable description
        message: String,
    },
}
