//! Integration Tests for the Station Protocol Core
//!
//! These tests verify the complete flows: device connect/recover/release over
//! real loopback sockets, and the positioning handshake against an in-memory
//! register bank standing in for the carriage PLC.

use station_protocol::plc::registers::{
    command, has_bit, status, COMMAND_REGISTER, STATUS_REGISTER,
};
use station_protocol::{
    ConnectionConfig, Device, DeviceEvent, DeviceStatus, MemoryRegisterBank,
    PlcEvent, PlcProtocolController, PositioningSettings, PositioningStage, StationError,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

fn test_settings() -> PositioningSettings {
    PositioningSettings {
        retreat_distance: 120,
        zero_positioning_time: 4000,
        estimated_home_distance: 900,
        direction_change_time: 250,
        velocity: 80,
        min_camera_box_distance: 150,
        target_camera_box_distance: 400,
    }
}

fn controller_over_bank(
    bank: &MemoryRegisterBank,
) -> (
    PlcProtocolController,
    tokio::sync::mpsc::UnboundedReceiver<PlcEvent>,
) {
    PlcProtocolController::new(Box::new(bank.client()))
}

fn stages(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PlcEvent>) -> Vec<PositioningStage> {
    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PlcEvent::StageChanged { stage } = event {
            stages.push(stage);
        }
    }
    stages
}

#[tokio::test]
async fn positioning_succeeds_with_plc_already_willing() {
    let bank = MemoryRegisterBank::new();
    bank.set(
        STATUS_REGISTER,
        status::POSITIONING_REQUEST | status::SYSTEM_POSITIONED,
    );
    let (controller, mut rx) = controller_over_bank(&bank);

    assert_ok!(
        controller
            .run_full_positioning(test_settings(), CancellationToken::new())
            .await
    );

    // Exactly the seven documented stages, in order, no repeats
    assert_eq!(
        stages(&mut rx),
        vec![
            PositioningStage::ParametersSet,
            PositioningStage::ForcePositioningSet,
            PositioningStage::PlcRequestReceived,
            PositioningStage::ForcePositioningReset,
            PositioningStage::PermissionGranted,
            PositioningStage::SystemPositioned,
            PositioningStage::Completed,
        ]
    );

    // Both command bits are back down
    assert!(!has_bit(bank.get(COMMAND_REGISTER), command::FORCE_POSITIONING));
    assert!(!has_bit(bank.get(COMMAND_REGISTER), command::POSITIONING_PERMIT));

    // The parameters landed in their registers
    assert_eq!(bank.get(PositioningSettings::REGISTERS[0]), 120);
    assert_eq!(bank.get(PositioningSettings::REGISTERS[6]), 400);
}

#[tokio::test(start_paused = true)]
async fn positioning_handshake_against_simulated_carriage() {
    let bank = MemoryRegisterBank::new();
    let (controller, mut rx) = controller_over_bank(&bank);

    // Carriage firmware stand-in: answers force-positioning with a request,
    // and permission with a completed move, on its own scan cycle
    let carriage = {
        let bank = bank.clone();
        tokio::spawn(async move {
            loop {
                let cmd = bank.get(COMMAND_REGISTER);
                let mut st = bank.get(STATUS_REGISTER);
                if has_bit(cmd, command::FORCE_POSITIONING) {
                    st |= status::POSITIONING_REQUEST;
                }
                if has_bit(cmd, command::POSITIONING_PERMIT) {
                    st |= status::SYSTEM_POSITIONED;
                }
                bank.set(STATUS_REGISTER, st);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let result = controller
        .run_full_positioning(test_settings(), CancellationToken::new())
        .await;
    carriage.abort();
    assert_ok!(result);

    let observed = stages(&mut rx);
    assert_eq!(observed.len(), 7);
    assert_eq!(observed.last(), Some(&PositioningStage::Completed));
}

#[tokio::test(start_paused = true)]
async fn positioning_request_timeout_cleans_up_force_bit() {
    let bank = MemoryRegisterBank::new();
    let (controller, mut rx) = controller_over_bank(&bank);

    let started = tokio::time::Instant::now();
    let result = controller
        .run_full_positioning(test_settings(), CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(StationError::PositioningTimeout(_))));
    // Failure lands at the 30 s deadline, within one poll period
    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed <= Duration::from_secs(31));

    assert!(!has_bit(bank.get(COMMAND_REGISTER), command::FORCE_POSITIONING));
    assert_eq!(
        stages(&mut rx),
        vec![
            PositioningStage::ParametersSet,
            PositioningStage::ForcePositioningSet,
            PositioningStage::Error,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_wait_clears_both_command_bits() {
    let bank = MemoryRegisterBank::new();
    // The PLC asks for positioning but never finishes the move
    bank.set(STATUS_REGISTER, status::POSITIONING_REQUEST);
    let (controller, mut rx) = controller_over_bank(&bank);

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        })
    };

    let result = controller
        .run_full_positioning(test_settings(), cancel)
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(StationError::Cancelled(_))));
    assert!(!has_bit(bank.get(COMMAND_REGISTER), command::FORCE_POSITIONING));
    assert!(!has_bit(bank.get(COMMAND_REGISTER), command::POSITIONING_PERMIT));

    // Cancellation is not an error: the sequence stops after PermissionGranted
    // with no Error stage
    let observed = stages(&mut rx);
    assert_eq!(observed.last(), Some(&PositioningStage::PermissionGranted));
    assert!(!observed.contains(&PositioningStage::Error));
}

#[tokio::test]
async fn device_recovers_within_the_retry_budget() {
    // Reserve a port, then leave it dead for the first attempts
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = ConnectionConfig::new("127.0.0.1", port);
    config.reconnect_retry_count = 3;
    config.reconnect_retry_delay_ms = 200;

    let (device, mut rx) = Device::new(config);
    let connecting = tokio::spawn(async move { (device.connect().await, device) });

    // Initial dial and the first cycle attempts fail; the peer comes up
    // before the budget is spent
    tokio::time::sleep(Duration::from_millis(350)).await;
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let (result, device) = connecting.await.unwrap();
    assert_ok!(result);
    assert_eq!(device.status().await, DeviceStatus::Running);
    assert_eq!(device.retry_attempt().await, 0);

    let mut saw_reconnecting = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            DeviceEvent::StatusChanged {
                status: DeviceStatus::Reconnecting,
            } => saw_reconnecting = true,
            DeviceEvent::FatalError { message } => {
                panic!("no fatal error expected, got: {}", message)
            }
            _ => {}
        }
    }
    assert!(saw_reconnecting);
}

#[tokio::test]
async fn released_device_reports_no_data_instead_of_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let (device, _rx) = Device::new(ConnectionConfig::new("127.0.0.1", port));
    device.connect().await.unwrap();
    assert!(device.release(DeviceStatus::Inactive).await);

    // Non-blocking reads on a released device are quiet, not failures
    assert_eq!(device.available().await, 0);
    assert!(device.read().await.is_none());
    assert!(matches!(
        device.write(b"CT~~CD,~CC^~CT~").await,
        Err(StationError::NotConnected)
    ));
}
