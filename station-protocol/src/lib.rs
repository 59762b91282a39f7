//! Aggregation Station Protocol Implementation
//!
//! This library provides the device connection and protocol control core for a
//! packaging-line aggregation station: a self-healing TCP device abstraction
//! shared by every hardware peer (PLC, label printer), and the register/bit-level
//! handshake protocol that drives the physical positioning carriage.
//!
//! The main pieces:
//!
//! - [`TcpTransport`] opens and owns one TCP session, tuned with the station
//!   keep-alive profile.
//! - [`LivenessProbe`] checks a session for life without consuming protocol bytes.
//! - [`Device`] wraps a transport with periodic liveness monitoring and a
//!   bounded reconnect-with-backoff cycle, reporting lifecycle changes as events.
//! - [`PlcProtocolController`] layers the carriage protocol on top: the
//!   heartbeat handshake, bit-level commands, parameter-group writes, error
//!   register decoding, and the full positioning sequence.

pub mod config;
pub mod device;
pub mod plc;
pub mod transport;

mod error;

pub use config::ConnectionConfig;
pub use device::{Device, DeviceEvent, DeviceStatus, ReconnectPolicy};
pub use error::{Result, StationError};
pub use plc::{
    BoxWorkSettings, LightingSettings, MemoryRegisterBank, MemoryRegisterClient,
    ModbusRegisterClient, PlcErrors, PlcEvent, PlcProtocolController, PositioningSettings,
    PositioningStage, RegisterClient,
};
pub use transport::{LivenessProbe, ProbeOutcome, TcpTransport};
