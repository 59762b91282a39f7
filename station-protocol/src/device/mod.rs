//! Device Lifecycle Management
//!
//! A [`Device`] owns one TCP session and keeps it alive: a periodic liveness
//! probe detects dead links, and a bounded reconnect cycle with linear
//! backoff brings them back. Observers receive [`DeviceEvent`]s over a
//! channel in the exact order the transitions occurred.
//!
//! ## Lifecycle
//!
//! Unknown → StartingUp → {Ready|Running} → {Stopping|Reconnecting|Fail}
//!
//! `Fail` is terminal: the retry budget is spent and the device has raised
//! its one `FatalError`. Recovery from `Fail` requires external
//! re-initialization; the device never retries on its own from there.

mod events;
mod reconnect;

pub use events::DeviceEvent;
pub use reconnect::ReconnectPolicy;

use crate::transport::{LivenessProbe, ProbeOutcome, TcpTransport};
use crate::{ConnectionConfig, Result, StationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Device lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Not yet initialized
    Unknown,
    /// Connection attempt in progress
    StartingUp,
    /// Connected, monitoring not yet active
    Ready,
    /// Connected and in service
    Running,
    /// Release in progress
    Stopping,
    /// Released by the caller
    Inactive,
    /// Retry budget spent; terminal until re-initialized
    Fail,
    /// Reconnect cycle in progress
    Reconnecting,
}

impl DeviceStatus {
    /// Whether the device holds a live session in this status
    pub fn is_connected(&self) -> bool {
        matches!(self, DeviceStatus::Ready | DeviceStatus::Running)
    }
}

struct DeviceInner {
    config: ConnectionConfig,
    transport: Mutex<Option<TcpTransport>>,
    status: RwLock<DeviceStatus>,
    policy: Mutex<ReconnectPolicy>,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    /// Held for the duration of a reconnect cycle; `try_lock` failing means
    /// another cycle is already in flight and this one must not start
    reconnect_gate: Mutex<()>,
}

/// A live (or failed) TCP peer
///
/// The device exclusively owns its session. Raw read/write primitives are
/// exposed for line-protocol collaborators (the label printer); the PLC
/// register channel is layered over the same session via
/// [`Device::register_stream`].
pub struct Device {
    inner: Arc<DeviceInner>,
    monitor_task: RwLock<Option<JoinHandle<()>>>,
}

impl Device {
    /// Create a device for `config` together with its event receiver
    ///
    /// The device starts in `Unknown` with no session; call
    /// [`Device::connect`] to establish one.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::new(
            config.reconnect_retry_count,
            config.reconnect_retry_delay(),
        );

        let device = Self {
            inner: Arc::new(DeviceInner {
                config,
                transport: Mutex::new(None),
                status: RwLock::new(DeviceStatus::Unknown),
                policy: Mutex::new(policy),
                event_tx,
                reconnect_gate: Mutex::new(()),
            }),
            monitor_task: RwLock::new(None),
        };
        (device, event_rx)
    }

    /// Current status
    pub async fn status(&self) -> DeviceStatus {
        *self.inner.status.read().await
    }

    /// Current reconnect attempt counter (zero after a successful connect)
    pub async fn retry_attempt(&self) -> u32 {
        self.inner.policy.lock().await.attempt()
    }

    /// Establish the session
    ///
    /// Dials once; if that fails, falls into the bounded reconnect cycle, so
    /// a flaky peer still comes up as long as it answers within the retry
    /// budget. Returns an error only when the cycle ends in `Fail`.
    pub async fn connect(&self) -> Result<()> {
        if self.status().await == DeviceStatus::Fail {
            warn!(
                "device {} is terminally failed; re-initialize it instead of reconnecting",
                self.inner.config.ip
            );
            return Err(StationError::NotConnected);
        }
        if self.inner.transport.lock().await.is_some() {
            debug!("device {} already connected", self.inner.config.ip);
            return Ok(());
        }

        set_status(&self.inner, DeviceStatus::StartingUp).await;

        match TcpTransport::open(&self.inner.config).await {
            Ok(transport) => {
                *self.inner.transport.lock().await = Some(transport);
                self.inner.policy.lock().await.reset();
                set_status(&self.inner, DeviceStatus::Ready).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "initial connect to {}:{} failed: {}",
                    self.inner.config.ip, self.inner.config.port, e
                );
                run_reconnect_cycle(self.inner.clone()).await;
                if self.status().await.is_connected() {
                    Ok(())
                } else {
                    Err(StationError::NotConnected)
                }
            }
        }
    }

    /// Non-blocking liveness check kickoff
    ///
    /// Spawns one probe; on completion a `StatusReceived` event fires, and a
    /// failed probe enters the reconnect cycle (or `Fail` when the budget is
    /// already spent).
    pub fn request_status(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_probe(inner).await;
        });
    }

    /// Start the periodic liveness monitor
    pub async fn start_status_monitor(&self, interval: Duration) {
        self.stop_status_monitor().await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately; probe after one period
            loop {
                ticker.tick().await;
                run_probe(inner.clone()).await;
            }
        });

        *self.monitor_task.write().await = Some(handle);
    }

    /// Stop the periodic liveness monitor
    ///
    /// After this returns, no further probe events fire.
    pub async fn stop_status_monitor(&self) {
        if let Some(task) = self.monitor_task.write().await.take() {
            task.abort();
        }
    }

    /// Close the session and settle on `target`
    ///
    /// Idempotent; faults are logged and reflected in the return value, never
    /// propagated.
    pub async fn release(&self, target: DeviceStatus) -> bool {
        self.stop_status_monitor().await;

        let taken = self.inner.transport.lock().await.take();
        match taken {
            Some(transport) => {
                set_status(&self.inner, DeviceStatus::Stopping).await;
                let mut ok = true;
                if let Err(e) = transport.shutdown().await {
                    warn!("release of {}: shutdown failed: {}", self.inner.config.ip, e);
                    ok = false;
                }
                set_status(&self.inner, target).await;
                info!("device {} released", self.inner.config.ip);
                ok
            }
            None => {
                set_status(&self.inner, target).await;
                true
            }
        }
    }

    /// Number of bytes available right now; zero when unconnected or faulted
    pub async fn available(&self) -> usize {
        match self.inner.transport.lock().await.as_ref() {
            Some(transport) => transport.available().await,
            None => 0,
        }
    }

    /// Read whatever is currently buffered; `None` means no data, never an error
    pub async fn read(&self) -> Option<Vec<u8>> {
        match self.inner.transport.lock().await.as_ref() {
            Some(transport) => transport.read_available().await,
            None => None,
        }
    }

    /// Raw write for line-protocol collaborators
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.transport.lock().await;
        match guard.as_mut() {
            Some(transport) => {
                transport
                    .write_all(data, self.inner.config.send_timeout())
                    .await
            }
            None => Err(StationError::NotConnected),
        }
    }

    /// Second stream handle over the same session, for the register codec
    pub async fn register_stream(&self) -> Result<tokio::net::TcpStream> {
        match self.inner.transport.lock().await.as_ref() {
            Some(transport) => transport.try_clone_stream(),
            None => Err(StationError::NotConnected),
        }
    }
}

/// Record a status value; emits `StatusChanged` only on an actual change
async fn set_status(inner: &Arc<DeviceInner>, status: DeviceStatus) {
    let changed = {
        let mut current = inner.status.write().await;
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    };

    if changed {
        debug!("device {} status -> {:?}", inner.config.ip, status);
        let _ = inner.event_tx.send(DeviceEvent::StatusChanged { status });
    }
}

async fn run_probe(inner: Arc<DeviceInner>) {
    let current = *inner.status.read().await;
    if matches!(
        current,
        DeviceStatus::Fail | DeviceStatus::Inactive | DeviceStatus::Stopping
    ) {
        return;
    }

    let outcome = {
        let guard = inner.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => {
                LivenessProbe::new(inner.config.request_status_timeout())
                    .check(transport)
                    .await
            }
            None => ProbeOutcome::NoConnection,
        }
    };

    let healthy = outcome.is_alive();
    let _ = inner.event_tx.send(DeviceEvent::StatusReceived { healthy });

    if healthy {
        return;
    }

    warn!(
        "device {} liveness probe failed: {:?}",
        inner.config.ip, outcome
    );
    run_reconnect_cycle(inner).await;
}

/// One bounded reconnect cycle: linear backoff, then `Fail` + one `FatalError`
async fn run_reconnect_cycle(inner: Arc<DeviceInner>) {
    // A device never has two reconnect cycles in flight
    let Ok(_gate) = inner.reconnect_gate.try_lock() else {
        debug!("device {} reconnect already in flight", inner.config.ip);
        return;
    };

    if let Some(stale) = inner.transport.lock().await.take() {
        let _ = stale.shutdown().await;
    }
    set_status(&inner, DeviceStatus::Reconnecting).await;

    loop {
        let delay = inner.policy.lock().await.next_delay();
        match delay {
            Some(delay) => {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                match TcpTransport::open(&inner.config).await {
                    Ok(transport) => {
                        *inner.transport.lock().await = Some(transport);
                        inner.policy.lock().await.reset();
                        set_status(&inner, DeviceStatus::Running).await;
                        info!("device {} reconnected", inner.config.ip);
                        return;
                    }
                    Err(e) => {
                        let status = inner.policy.lock().await.status();
                        warn!(
                            "device {} reconnect failed ({}): {}",
                            inner.config.ip, status, e
                        );
                    }
                }
            }
            None => {
                set_status(&inner, DeviceStatus::Fail).await;
                let message = format!(
                    "device {}:{} unreachable after {} connection attempts",
                    inner.config.ip,
                    inner.config.port,
                    inner.config.reconnect_retry_count + 1
                );
                error!("{}", message);
                let _ = inner.event_tx.send(DeviceEvent::FatalError { message });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Reserve a loopback port with nothing listening on it
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[DeviceEvent]) -> Vec<DeviceStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::StatusChanged { status } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn connect_emits_starting_up_then_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let (device, mut rx) = Device::new(ConnectionConfig::new("127.0.0.1", port));
        device.connect().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            statuses(&events),
            vec![DeviceStatus::StartingUp, DeviceStatus::Ready]
        );
        assert_eq!(device.status().await, DeviceStatus::Ready);
        assert_eq!(device.retry_attempt().await, 0);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_reaches_fail_with_one_fatal_error() {
        let mut config = ConnectionConfig::new("127.0.0.1", dead_port().await);
        config.reconnect_retry_count = 2;
        config.reconnect_retry_delay_ms = 10;

        let (device, mut rx) = Device::new(config);
        assert!(device.connect().await.is_err());
        assert_eq!(device.status().await, DeviceStatus::Fail);

        let events = drain(&mut rx);
        assert_eq!(
            statuses(&events),
            vec![
                DeviceStatus::StartingUp,
                DeviceStatus::Reconnecting,
                DeviceStatus::Fail
            ]
        );

        let fatal_count = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::FatalError { .. }))
            .count();
        assert_eq!(fatal_count, 1);
    }

    #[tokio::test]
    async fn probe_in_fail_state_does_not_retry() {
        let mut config = ConnectionConfig::new("127.0.0.1", dead_port().await);
        config.reconnect_retry_count = 0;
        config.reconnect_retry_delay_ms = 10;

        let (device, mut rx) = Device::new(config);
        let _ = device.connect().await;
        assert_eq!(device.status().await, DeviceStatus::Fail);
        drain(&mut rx);

        device.request_status();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Terminal: no probe events, no new cycle
        assert!(drain(&mut rx).is_empty());
        assert_eq!(device.status().await, DeviceStatus::Fail);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let (device, mut rx) = Device::new(ConnectionConfig::new("127.0.0.1", port));
        device.connect().await.unwrap();
        drain(&mut rx);

        assert!(device.release(DeviceStatus::Inactive).await);
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![DeviceStatus::Stopping, DeviceStatus::Inactive]
        );

        // Second release: still succeeds, no session, no new events
        assert!(device.release(DeviceStatus::Inactive).await);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(device.status().await, DeviceStatus::Inactive);
    }

    #[tokio::test]
    async fn monitor_emits_heartbeat_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Hold accepted sockets so the peer side stays open; a dropped
            // stream would close the connection and the probe would correctly
            // report ClosedByPeer instead of the intended quiet live link.
            let mut conns = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    conns.push(stream);
                }
            }
        });

        let mut config = ConnectionConfig::new("127.0.0.1", port);
        config.request_status_timeout_ms = 10;
        let (device, mut rx) = Device::new(config);
        device.connect().await.unwrap();
        drain(&mut rx);

        device.start_status_monitor(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        device.stop_status_monitor().await;

        let received = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, DeviceEvent::StatusReceived { healthy: true }))
            .count();
        assert!(received >= 2, "expected repeated probe events, got {}", received);

        // No probe fires after teardown
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
