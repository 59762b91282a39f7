//! PLC Protocol Controller
//!
//! Drives the carriage protocol over one device session: the heartbeat
//! handshake, bit-level commands, parameter-group writes, error-register
//! inspection and the full positioning sequence.
//!
//! ## Serialization
//!
//! The register channel is transactional request/response. Every operation
//! (heartbeat ping, bit mutation, group write, status poll) takes the one
//! connection-scoped lock for exactly the duration of its register traffic.
//! No lock is ever held across a wait that depends on another task, so the
//! heartbeat and a running positioning sequence interleave without deadlock.

use super::client::RegisterClient;
use super::events::PlcEvent;
use super::faults::PlcErrors;
use super::positioning::{
    PositioningStage, COMPLETION_WAIT_TIMEOUT, POLL_INTERVAL, REQUEST_WAIT_TIMEOUT,
};
use super::registers::{
    command, has_bit, status, with_bit, COMMAND_REGISTER, CYCLE_STEP_REGISTER,
    FATAL_ERROR_REGISTER, FATAL_FINAL_ERROR_REGISTER, NON_FATAL_ERROR_REGISTER, STATUS_REGISTER,
};
use super::settings::{BoxWorkSettings, LightingSettings, PositioningSettings};
use crate::device::{Device, DeviceEvent, DeviceStatus};
use crate::plc::client::ModbusRegisterClient;
use crate::{ConnectionConfig, Result, StationError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive ping failures before the error registers are inspected
const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

/// Protocol controller for the positioning PLC
///
/// Owns the register client built over exactly one device; no two
/// controllers share a session.
pub struct PlcProtocolController {
    client: Arc<Mutex<Box<dyn RegisterClient>>>,
    event_tx: mpsc::UnboundedSender<PlcEvent>,
    device: Option<Device>,
    heartbeat_task: RwLock<Option<JoinHandle<()>>>,
    heartbeat_failures: Arc<AtomicU32>,
}

impl PlcProtocolController {
    /// Build a controller over an existing register client
    ///
    /// Used by the bench rig and the tests; production wiring goes through
    /// [`PlcProtocolController::connect`].
    pub fn new(
        client: Box<dyn RegisterClient>,
    ) -> (Self, mpsc::UnboundedReceiver<PlcEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                client: Arc::new(Mutex::new(client)),
                event_tx,
                device: None,
                heartbeat_task: RwLock::new(None),
                heartbeat_failures: Arc::new(AtomicU32::new(0)),
            },
            event_rx,
        )
    }

    /// Connect to the PLC and wire the full stack
    ///
    /// Establishes the device session, attaches the register codec to a
    /// duplicate handle of the same socket, and forwards device lifecycle
    /// events (connection changes, fatal errors) into the controller's event
    /// stream. The forwarding task ends on its own when the controller is
    /// dropped.
    pub async fn connect(
        config: ConnectionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlcEvent>)> {
        let (device, mut device_rx) = Device::new(config.clone());
        device.connect().await?;

        let stream = device.register_stream().await?;
        let client = ModbusRegisterClient::attach(stream, &config);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = device_rx.recv().await {
                let mapped = match event {
                    DeviceEvent::StatusChanged { status } => Some(PlcEvent::ConnectionChanged {
                        connected: status.is_connected(),
                    }),
                    DeviceEvent::FatalError { message } => {
                        Some(PlcEvent::FatalError { message })
                    }
                    DeviceEvent::StatusReceived { .. } => None,
                };
                if let Some(event) = mapped {
                    if forward_tx.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                client: Arc::new(Mutex::new(Box::new(client))),
                event_tx,
                device: Some(device),
                heartbeat_task: RwLock::new(None),
                heartbeat_failures: Arc::new(AtomicU32::new(0)),
            },
            event_rx,
        ))
    }

    /// The owned device, when this controller was wired via `connect`
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Start the device liveness monitor
    pub async fn start_monitoring(&self, interval: Duration) {
        if let Some(device) = &self.device {
            device.start_status_monitor(interval).await;
        }
    }

    /// Swap in a new register client
    ///
    /// After a device reconnect the old codec points at a dead socket;
    /// re-attach over `Device::register_stream` and install the replacement
    /// here. The swap takes the connection lock, so it never interleaves
    /// with an in-flight operation.
    pub async fn replace_client(&self, client: Box<dyn RegisterClient>) {
        *self.client.lock().await = client;
    }

    /// Read-modify-write one bit of a holding register
    ///
    /// The read and the write-back are a single critical section under the
    /// connection lock; interleaving two of these on the same register would
    /// silently lose one bit.
    pub async fn set_bit(&self, register: u16, mask: u16, value: bool) -> Result<()> {
        let mut client = self.client.lock().await;
        let current = client.read_holding(register).await?;
        client
            .write_holding(register, with_bit(current, mask, value))
            .await
    }

    pub async fn set_connect_control_enable(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::CONNECT_CONTROL_ENABLE, on).await
    }

    pub async fn set_force_positioning(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::FORCE_POSITIONING, on).await
    }

    pub async fn set_positioning_permit(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::POSITIONING_PERMIT, on).await
    }

    pub async fn set_cycle_step_start(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::CYCLE_STEP_START, on).await
    }

    pub async fn set_photo_taken(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::PHOTO_TAKEN, on).await
    }

    pub async fn set_start_pedal(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::START_PEDAL, on).await
    }

    pub async fn set_apply_distance(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::APPLY_DISTANCE, on).await
    }

    pub async fn set_continuous_light(&self, on: bool) -> Result<()> {
        self.set_bit(COMMAND_REGISTER, command::CONTINUOUS_LIGHT, on).await
    }

    /// One heartbeat exchange
    ///
    /// Reads the command register; when the PLC has raised the
    /// connect-handshake bit, answers with two sequential read-modify-writes:
    /// clear the handshake, then raise plc-active. Returns whether a
    /// handshake was answered.
    pub async fn ping_pong(&self) -> Result<bool> {
        ping_pong_once(&self.client).await
    }

    /// Start the recurring heartbeat
    ///
    /// Ping failures never stop the loop: they are counted, and after
    /// [`HEARTBEAT_FAILURE_THRESHOLD`] consecutive misses the error registers
    /// are inspected for a reported cause.
    pub async fn start_heartbeat(&self, interval: Duration) {
        self.stop_heartbeat().await;

        let client = self.client.clone();
        let event_tx = self.event_tx.clone();
        let failures = self.heartbeat_failures.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match ping_pong_once(&client).await {
                    Ok(answered) => {
                        failures.store(0, Ordering::Relaxed);
                        if answered {
                            debug!("heartbeat answered PLC handshake");
                        }
                    }
                    Err(e) => {
                        let misses = failures.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!("heartbeat ping failed ({} consecutive): {}", misses, e);
                        if misses >= HEARTBEAT_FAILURE_THRESHOLD {
                            if let Err(e) = inspect_errors_once(&client, &event_tx).await {
                                warn!("error register inspection failed: {}", e);
                            }
                        }
                    }
                }
            }
        });

        *self.heartbeat_task.write().await = Some(handle);
    }

    /// Stop the recurring heartbeat; no ping fires after this returns
    pub async fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat_task.write().await.take() {
            task.abort();
        }
    }

    /// Read and decode all three error registers
    ///
    /// Emits [`PlcEvent::ErrorsReceived`] when any bit is set. Never changes
    /// device status; whether a condition forces a shutdown is the
    /// orchestrator's call.
    pub async fn inspect_errors(&self) -> Result<PlcErrors> {
        inspect_errors_once(&self.client, &self.event_tx).await
    }

    /// Write the positioning parameter group wholesale
    pub async fn write_positioning_settings(
        &self,
        settings: &PositioningSettings,
    ) -> Result<()> {
        let mut client = self.client.lock().await;
        for (address, word) in PositioningSettings::REGISTERS.iter().zip(settings.to_words()) {
            client.write_holding(*address, word).await?;
        }
        Ok(())
    }

    /// Read the positioning parameter group back
    pub async fn read_positioning_settings(&self) -> Result<PositioningSettings> {
        let mut client = self.client.lock().await;
        let mut words = [0u16; 7];
        for (slot, address) in words.iter_mut().zip(PositioningSettings::REGISTERS) {
            *slot = client.read_holding(address).await?;
        }
        Ok(PositioningSettings::from_words(words))
    }

    /// Write the box work parameter group wholesale
    pub async fn write_box_work_settings(&self, settings: &BoxWorkSettings) -> Result<()> {
        let mut client = self.client.lock().await;
        for (address, word) in BoxWorkSettings::REGISTERS.iter().zip(settings.to_words()) {
            client.write_holding(*address, word).await?;
        }
        Ok(())
    }

    /// Read the box work parameter group back
    pub async fn read_box_work_settings(&self) -> Result<BoxWorkSettings> {
        let mut client = self.client.lock().await;
        let mut words = [0u16; 2];
        for (slot, address) in words.iter_mut().zip(BoxWorkSettings::REGISTERS) {
            *slot = client.read_holding(address).await?;
        }
        Ok(BoxWorkSettings::from_words(words))
    }

    /// Write the lighting parameter group wholesale
    pub async fn write_lighting_settings(&self, settings: &LightingSettings) -> Result<()> {
        let mut client = self.client.lock().await;
        for (address, word) in LightingSettings::REGISTERS.iter().zip(settings.to_words()) {
            client.write_holding(*address, word).await?;
        }
        Ok(())
    }

    /// Read the lighting parameter group back
    pub async fn read_lighting_settings(&self) -> Result<LightingSettings> {
        let mut client = self.client.lock().await;
        let mut words = [0u16; 5];
        for (slot, address) in words.iter_mut().zip(LightingSettings::REGISTERS) {
            *slot = client.read_holding(address).await?;
        }
        Ok(LightingSettings::from_words(words))
    }

    /// Write the cycle step number
    pub async fn write_cycle_step(&self, step: u16) -> Result<()> {
        let mut client = self.client.lock().await;
        client.write_holding(CYCLE_STEP_REGISTER, step).await
    }

    /// Run the full positioning sequence
    ///
    /// Linear state machine, forward-only; every transition emits one
    /// [`PlcEvent::StageChanged`]. Timeouts and register faults clean up the
    /// raised command bits exactly once before reporting; cancellation does
    /// the same but is not treated as a fault.
    pub async fn run_full_positioning(
        &self,
        settings: PositioningSettings,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("starting full positioning sequence");
        let result = self.positioning_steps(settings, &cancel).await;
        match &result {
            Ok(()) => info!("positioning sequence completed"),
            Err(e) => {
                // One cleanup path for timeout, cancellation and faults
                // alike: lower whichever command bits the sequence still
                // holds up. The cleanup itself is not interruptible.
                self.clear_bit_best_effort(command::FORCE_POSITIONING).await;
                self.clear_bit_best_effort(command::POSITIONING_PERMIT).await;
                if e.is_cancelled() {
                    info!("positioning sequence cancelled");
                } else {
                    error!("positioning sequence failed: {}", e);
                    self.emit_stage(PositioningStage::Error);
                }
            }
        }
        result
    }

    async fn positioning_steps(
        &self,
        settings: PositioningSettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_positioning_settings(&settings).await?;
        self.emit_stage(PositioningStage::ParametersSet);

        self.set_force_positioning(true).await?;
        self.emit_stage(PositioningStage::ForcePositioningSet);

        self.wait_for_status_bit(
            status::POSITIONING_REQUEST,
            REQUEST_WAIT_TIMEOUT,
            cancel,
            "positioning request",
        )
        .await?;
        self.emit_stage(PositioningStage::PlcRequestReceived);

        self.set_force_positioning(false).await?;
        self.emit_stage(PositioningStage::ForcePositioningReset);

        self.set_positioning_permit(true).await?;
        self.emit_stage(PositioningStage::PermissionGranted);

        self.wait_for_status_bit(
            status::SYSTEM_POSITIONED,
            COMPLETION_WAIT_TIMEOUT,
            cancel,
            "positioning completion",
        )
        .await?;
        self.emit_stage(PositioningStage::SystemPositioned);

        self.set_positioning_permit(false).await?;
        self.emit_stage(PositioningStage::Completed);
        Ok(())
    }

    /// Bounded poll for one status bit
    ///
    /// Polls every [`POLL_INTERVAL`] so cancellation is observable between
    /// polls; the connection lock is taken per read, never across a sleep.
    async fn wait_for_status_bit(
        &self,
        mask: u16,
        wait_timeout: Duration,
        cancel: &CancellationToken,
        what: &str,
    ) -> Result<()> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(StationError::Cancelled(format!("waiting for {}", what)));
            }

            let value = {
                let mut client = self.client.lock().await;
                client.read_input(STATUS_REGISTER).await?
            };
            if has_bit(value, mask) {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(StationError::PositioningTimeout(format!(
                    "timed out waiting for {}",
                    what
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Cleanup write; ignores cancellation and logs its own faults
    async fn clear_bit_best_effort(&self, mask: u16) {
        if let Err(e) = self.set_bit(COMMAND_REGISTER, mask, false).await {
            warn!("positioning cleanup: failed to clear {:#06x}: {}", mask, e);
        }
    }

    fn emit_stage(&self, stage: PositioningStage) {
        debug!("positioning stage -> {:?}", stage);
        let _ = self.event_tx.send(PlcEvent::StageChanged { stage });
    }

    /// Release the underlying device and stop all recurring work
    pub async fn shutdown(&self) {
        self.stop_heartbeat().await;
        if let Some(device) = &self.device {
            device.release(DeviceStatus::Inactive).await;
        }
    }
}

async fn ping_pong_once(client: &Mutex<Box<dyn RegisterClient>>) -> Result<bool> {
    let mut client = client.lock().await;

    let current = client.read_holding(COMMAND_REGISTER).await?;
    if !has_bit(current, command::CONNECT_HANDSHAKE) {
        return Ok(false);
    }

    // Answer: clear the handshake bit, then raise plc-active
    let cleared = with_bit(current, command::CONNECT_HANDSHAKE, false);
    client.write_holding(COMMAND_REGISTER, cleared).await?;

    let current = client.read_holding(COMMAND_REGISTER).await?;
    client
        .write_holding(COMMAND_REGISTER, with_bit(current, command::PLC_ACTIVE, true))
        .await?;

    Ok(true)
}

async fn inspect_errors_once(
    client: &Mutex<Box<dyn RegisterClient>>,
    event_tx: &mpsc::UnboundedSender<PlcEvent>,
) -> Result<PlcErrors> {
    let errors = {
        let mut client = client.lock().await;
        let non_fatal = client.read_input(NON_FATAL_ERROR_REGISTER).await?;
        let fatal = client.read_input(FATAL_ERROR_REGISTER).await?;
        let fatal_final = client.read_input(FATAL_FINAL_ERROR_REGISTER).await?;
        PlcErrors::new(non_fatal, fatal, fatal_final)
    };

    if errors.any() {
        warn!("PLC reports conditions: {}", errors.summary());
        let _ = event_tx.send(PlcEvent::ErrorsReceived { errors });
    }

    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::client::MemoryRegisterBank;
    use crate::plc::registers::FATAL_ERROR_REGISTER;

    fn controller_over_bank(
        bank: &MemoryRegisterBank,
    ) -> (PlcProtocolController, mpsc::UnboundedReceiver<PlcEvent>) {
        PlcProtocolController::new(Box::new(bank.client()))
    }

    #[tokio::test]
    async fn set_bit_round_trips_to_zero() {
        let bank = MemoryRegisterBank::new();
        let (controller, _rx) = controller_over_bank(&bank);

        controller
            .set_bit(COMMAND_REGISTER, command::FORCE_POSITIONING, true)
            .await
            .unwrap();
        assert_eq!(bank.get(COMMAND_REGISTER), command::FORCE_POSITIONING);

        controller
            .set_bit(COMMAND_REGISTER, command::FORCE_POSITIONING, false)
            .await
            .unwrap();
        assert_eq!(bank.get(COMMAND_REGISTER), 0);
    }

    #[tokio::test]
    async fn concurrent_set_bits_do_not_lose_updates() {
        let bank = MemoryRegisterBank::new();
        let (controller, _rx) = controller_over_bank(&bank);
        let controller = Arc::new(controller);

        let a = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .set_bit(COMMAND_REGISTER, command::PHOTO_TAKEN, true)
                    .await
            })
        };
        let b = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .set_bit(COMMAND_REGISTER, command::START_PEDAL, true)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(
            bank.get(COMMAND_REGISTER),
            command::PHOTO_TAKEN | command::START_PEDAL
        );
    }

    #[tokio::test]
    async fn ping_pong_answers_a_raised_handshake() {
        let bank = MemoryRegisterBank::new();
        bank.set(
            COMMAND_REGISTER,
            command::CONNECT_HANDSHAKE | command::CONTINUOUS_LIGHT,
        );
        let (controller, _rx) = controller_over_bank(&bank);

        assert!(controller.ping_pong().await.unwrap());

        let value = bank.get(COMMAND_REGISTER);
        assert!(!has_bit(value, command::CONNECT_HANDSHAKE));
        assert!(has_bit(value, command::PLC_ACTIVE));
        // Unrelated bits survive the exchange
        assert!(has_bit(value, command::CONTINUOUS_LIGHT));
    }

    #[tokio::test]
    async fn ping_pong_without_handshake_writes_nothing() {
        let bank = MemoryRegisterBank::new();
        bank.set(COMMAND_REGISTER, command::FORCE_POSITIONING);
        let (controller, _rx) = controller_over_bank(&bank);

        assert!(!controller.ping_pong().await.unwrap());
        assert_eq!(bank.get(COMMAND_REGISTER), command::FORCE_POSITIONING);
    }

    #[tokio::test]
    async fn inspect_errors_emits_decoded_snapshot() {
        let bank = MemoryRegisterBank::new();
        bank.set(FATAL_ERROR_REGISTER, 0b1001);
        let (controller, mut rx) = controller_over_bank(&bank);

        let errors = controller.inspect_errors().await.unwrap();
        assert_eq!(
            errors.fatal_conditions(),
            vec![
                "Stepper motor driver error",
                "Insufficient camera-box distance"
            ]
        );

        match rx.try_recv().unwrap() {
            PlcEvent::ErrorsReceived { errors: received } => assert_eq!(received, errors),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn inspect_errors_is_silent_when_clean() {
        let bank = MemoryRegisterBank::new();
        let (controller, mut rx) = controller_over_bank(&bank);

        let errors = controller.inspect_errors().await.unwrap();
        assert!(!errors.any());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn settings_groups_write_their_registers() {
        let bank = MemoryRegisterBank::new();
        let (controller, _rx) = controller_over_bank(&bank);

        let box_work = BoxWorkSettings {
            box_height: 275,
            layers_quantity: 4,
        };
        controller.write_box_work_settings(&box_work).await.unwrap();
        assert_eq!(bank.get(BoxWorkSettings::REGISTERS[0]), 275);
        assert_eq!(bank.get(BoxWorkSettings::REGISTERS[1]), 4);
        assert_eq!(controller.read_box_work_settings().await.unwrap(), box_work);

        controller.write_cycle_step(7).await.unwrap();
        assert_eq!(bank.get(CYCLE_STEP_REGISTER), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_ping_failures_trigger_error_inspection() {
        let bank = MemoryRegisterBank::new();
        bank.set(FATAL_ERROR_REGISTER, 0b1);
        bank.set_holding_fault(true);
        let (controller, mut rx) = controller_over_bank(&bank);

        controller.start_heartbeat(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(450)).await;
        controller.stop_heartbeat().await;

        let saw_errors = std::iter::from_fn(|| rx.try_recv().ok()).any(|event| {
            matches!(
                event,
                PlcEvent::ErrorsReceived { errors } if errors.fatal == 0b1
            )
        });
        assert!(saw_errors, "expected an ErrorsReceived event after repeated misses");
    }
}
