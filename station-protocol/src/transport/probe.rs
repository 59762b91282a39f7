//! Liveness Probe
//!
//! Non-destructive health check for an established transport. The probe
//! distinguishes "alive", "closed by peer" and "not connected" by polling for
//! readability and peeking at the receive buffer. It never consumes protocol
//! payload bytes, so it can run between register transactions at any time.

use crate::transport::TcpTransport;
use crate::{Result, StationError};
use std::time::Duration;
use tracing::warn;

/// Result of one liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The link is healthy (quiet, or has payload waiting)
    Alive,
    /// The transport no longer reports an established connection
    NoConnection,
    /// The peer closed the connection: readable with zero bytes available
    ClosedByPeer,
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Alive)
    }

    /// Fold the outcome into a `Result` for callers that propagate
    pub fn into_result(self) -> Result<()> {
        match self {
            ProbeOutcome::Alive => Ok(()),
            ProbeOutcome::NoConnection => Err(StationError::NotConnected),
            ProbeOutcome::ClosedByPeer => Err(StationError::ClosedByPeer),
        }
    }
}

/// Non-destructive session health check
#[derive(Debug, Clone, Copy)]
pub struct LivenessProbe {
    timeout: Duration,
}

impl LivenessProbe {
    /// Create a probe with the given readability timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Check one transport
    ///
    /// 1. Transport reports itself disconnected → [`ProbeOutcome::NoConnection`].
    /// 2. Readable within the timeout but zero bytes peeked →
    ///    [`ProbeOutcome::ClosedByPeer`] (the EOF case).
    /// 3. Otherwise → [`ProbeOutcome::Alive`].
    pub async fn check(&self, transport: &TcpTransport) -> ProbeOutcome {
        if !transport.is_connected() {
            return ProbeOutcome::NoConnection;
        }

        match transport.readable_within(self.timeout).await {
            Ok(false) => ProbeOutcome::Alive,
            Ok(true) => match transport.peek_available().await {
                Ok(0) => ProbeOutcome::ClosedByPeer,
                Ok(_) => ProbeOutcome::Alive,
                Err(e) => {
                    warn!("probe peek on {} failed: {}", transport.remote_addr(), e);
                    ProbeOutcome::NoConnection
                }
            },
            Err(e) => {
                warn!("probe poll on {} failed: {}", transport.remote_addr(), e);
                ProbeOutcome::NoConnection
            }
        }
    }
}
