//! Device Events
//!
//! Events emitted by a device for lifecycle observers, delivered over an
//! unbounded channel in the exact order the transitions occurred.

use super::DeviceStatus;

/// Device lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device status actually changed value
    StatusChanged {
        /// New status
        status: DeviceStatus,
    },

    /// A liveness probe completed; fires on every probe regardless of result
    ///
    /// Observers use this as a heartbeat signal even while the status is
    /// stable.
    StatusReceived {
        /// Whether the probe found the session alive
        healthy: bool,
    },

    /// The retry budget is spent; the device is terminally failed
    ///
    /// Raised exactly once per failure; recovery requires external
    /// re-initialization.
    FatalError {
        /// Human-readable description
        message: String,
    },
}
