//! Reconnect Policy
//!
//! Linear-backoff retry budget for one reconnect cycle. Attempt `n` waits
//! `n × base_delay` before dialing, so a cycle with maximum 3 dials at
//! delays 0, d, 2d and 3d (four attempts in total) and then gives up.
//! The counter resets to zero only on a successful reconnect.

use std::time::Duration;

/// Retry budget with linear backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Current attempt number (number of failures so far in this cycle)
    attempt: u32,
    /// Maximum attempt counter value; the cycle dials `max_attempts + 1` times
    max_attempts: u32,
    /// Backoff unit
    base_delay: Duration,
}

impl ReconnectPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    /// Reset the counter (called on successful reconnect)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Check if more attempts are available
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt <= self.max_attempts
    }

    /// Delay before the next attempt, or `None` when the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }

        let delay = self.base_delay * self.attempt;
        self.attempt += 1;
        Some(delay)
    }

    /// Current attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        format!("attempt {}/{}", self.attempt, self.max_attempts + 1)
    }
}
