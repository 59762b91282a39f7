//! PLC Protocol Control
//!
//! The register/bit-level protocol of the positioning carriage PLC: the
//! heartbeat handshake, bit commands, parameter-group writes, error-register
//! decoding, and the full positioning sequence. All register traffic is
//! serialized behind one connection-scoped lock: the session is strictly
//! request/response, and interleaved operations corrupt framing.

pub mod client;
pub mod controller;
pub mod events;
pub mod faults;
pub mod positioning;
pub mod registers;
pub mod settings;

pub use client::{MemoryRegisterBank, MemoryRegisterClient, ModbusRegisterClient, RegisterClient};
pub use controller::PlcProtocolController;
pub use events::PlcEvent;
pub use faults::PlcErrors;
pub use positioning::PositioningStage;
pub use settings::{BoxWorkSettings, LightingSettings, PositioningSettings};
