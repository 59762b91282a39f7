//! Register Client
//!
//! Transactional 16-bit register access over the device session. The channel
//! is strictly request/response and concurrent in-flight operations corrupt
//! framing, so the controller serializes every call behind one
//! connection-scoped lock; implementations here do not lock anything
//! themselves.
//!
//! [`ModbusRegisterClient`] is the production implementation;
//! [`MemoryRegisterBank`] stands in for a PLC on the bench and in tests.

use crate::{ConnectionConfig, Result, StationError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

/// Modbus unit id of the carriage PLC
const PLC_UNIT_ID: u8 = 1;

/// Read/write access to 16-bit registers
///
/// "Holding" registers are read/write, "input" registers read-only.
#[async_trait]
pub trait RegisterClient: Send {
    /// Read one holding register
    async fn read_holding(&mut self, address: u16) -> Result<u16>;

    /// Read one input register
    async fn read_input(&mut self, address: u16) -> Result<u16>;

    /// Write one holding register
    async fn write_holding(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Register client over a modbus TCP context
pub struct ModbusRegisterClient {
    ctx: Context,
    receive_timeout: Duration,
    send_timeout: Duration,
}

impl ModbusRegisterClient {
    /// Attach to an existing stream of the device session
    ///
    /// The stream is a duplicate handle of the device's socket (see
    /// `Device::register_stream`), so register traffic and liveness probing
    /// share one TCP session.
    pub fn attach(stream: TcpStream, config: &ConnectionConfig) -> Self {
        let ctx = tcp::attach_slave(stream, Slave(PLC_UNIT_ID));
        Self {
            ctx,
            receive_timeout: config.receive_timeout(),
            send_timeout: config.send_timeout(),
        }
    }

    /// Dial a standalone register connection
    ///
    /// Used on the bench when no device monitoring is layered over the link.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let addr = config.socket_addr()?;
        let ctx = timeout(
            config.connect_timeout(),
            tcp::connect_slave(addr, Slave(PLC_UNIT_ID)),
        )
        .await
        .map_err(|_| StationError::Timeout(format!("connecting register channel to {}", addr)))?
        .map_err(|e| {
            StationError::Register(format!("connecting register channel to {}: {}", addr, e))
        })?;

        Ok(Self {
            ctx,
            receive_timeout: config.receive_timeout(),
            send_timeout: config.send_timeout(),
        })
    }
}

#[async_trait]
impl RegisterClient for ModbusRegisterClient {
    async fn read_holding(&mut self, address: u16) -> Result<u16> {
        let words = timeout(self.receive_timeout, self.ctx.read_holding_registers(address, 1))
            .await
            .map_err(|_| StationError::Timeout(format!("reading holding register {}", address)))?
            .map_err(|e| StationError::Register(e.to_string()))?
            .map_err(|e| StationError::Register(format!("exception: {:?}", e)))?;

        words
            .first()
            .copied()
            .ok_or_else(|| StationError::Register(format!("empty response for register {}", address)))
    }

    async fn read_input(&mut self, address: u16) -> Result<u16> {
        let words = timeout(self.receive_timeout, self.ctx.read_input_registers(address, 1))
            .await
            .map_err(|_| StationError::Timeout(format!("reading input register {}", address)))?
            .map_err(|e| StationError::Register(e.to_string()))?
            .map_err(|e| StationError::Register(format!("exception: {:?}", e)))?;

        words
            .first()
            .copied()
            .ok_or_else(|| StationError::Register(format!("empty response for register {}", address)))
    }

    async fn write_holding(&mut self, address: u16, value: u16) -> Result<()> {
        debug!("write register {} <- {:#06x}", address, value);
        timeout(self.send_timeout, self.ctx.write_single_register(address, value))
            .await
            .map_err(|_| StationError::Timeout(format!("writing holding register {}", address)))?
            .map_err(|e| StationError::Register(e.to_string()))?
            .map_err(|e| StationError::Register(format!("exception: {:?}", e)))?;
        Ok(())
    }
}

/// Shared in-memory register bank standing in for a PLC
///
/// Clones share the same cells, so a test (or bench rig) keeps one handle to
/// flip status bits while the controller drives a [`MemoryRegisterClient`]
/// over the same bank. The fault switch affects holding-register traffic
/// only: the command path can be broken while the error registers stay
/// readable, which is exactly the failure mode the heartbeat inspection
/// exists for.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegisterBank {
    cells: Arc<Mutex<HashMap<u16, u16>>>,
    holding_fault: Arc<AtomicBool>,
}

impl MemoryRegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client backed by this bank
    pub fn client(&self) -> MemoryRegisterClient {
        MemoryRegisterClient { bank: self.clone() }
    }

    /// Current value of a cell (unwritten cells read as zero)
    pub fn get(&self, address: u16) -> u16 {
        *self.cells.lock().unwrap().get(&address).unwrap_or(&0)
    }

    /// Set a cell directly, bypassing the client
    pub fn set(&self, address: u16, value: u16) {
        self.cells.lock().unwrap().insert(address, value);
    }

    /// Make holding-register operations fail until switched back
    pub fn set_holding_fault(&self, fail: bool) {
        self.holding_fault.store(fail, Ordering::SeqCst);
    }

    fn check_holding_fault(&self) -> Result<()> {
        if self.holding_fault.load(Ordering::SeqCst) {
            Err(StationError::Register("injected holding fault".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Register client over a [`MemoryRegisterBank`]
pub struct MemoryRegisterClient {
    bank: MemoryRegisterBank,
}

#[async_trait]
impl RegisterClient for MemoryRegisterClient {
    async fn read_holding(&mut self, address: u16) -> Result<u16> {
        self.bank.check_holding_fault()?;
        Ok(self.bank.get(address))
    }

    async fn read_input(&mut self, address: u16) -> Result<u16> {
        Ok(self.bank.get(address))
    }

    async fn write_holding(&mut self, address: u16, value: u16) -> Result<()> {
        self.bank.check_holding_fault()?;
        self.bank.set(address, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bank_cells_default_to_zero() {
        let bank = MemoryRegisterBank::new();
        let mut client = bank.client();

        assert_eq!(client.read_holding(100).await.unwrap(), 0);
        assert_eq!(client.read_input(120).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_are_visible_to_all_handles() {
        let bank = MemoryRegisterBank::new();
        let mut client = bank.client();

        client.write_holding(110, 275).await.unwrap();
        assert_eq!(bank.get(110), 275);

        bank.set(101, 0b10);
        assert_eq!(client.read_input(101).await.unwrap(), 0b10);
    }

    #[tokio::test]
    async fn holding_fault_spares_input_registers() {
        let bank = MemoryRegisterBank::new();
        bank.set(121, 0b1);
        let mut client = bank.client();

        bank.set_holding_fault(true);
        assert!(client.read_holding(100).await.is_err());
        assert!(client.write_holding(100, 1).await.is_err());
        assert_eq!(client.read_input(121).await.unwrap(), 0b1);

        bank.set_holding_fault(false);
        assert!(client.read_holding(100).await.is_ok());
    }
}
