//! Session bookkeeping: heartbeat watchdog and reconnect backoff.
//!
//! On session loss the link waits an exponential backoff (1 s → 2 s → 4 s
//! → … capped at `backoff_max_ms`) between reconnect attempts.  After
//! `reconnect_attempts` failures it gives up and the link degrades.

use std::io::Write;
use std::time::{Duration, Instant};

use super::protocol::DeviceInfo;
use crate::config::LinkConfig;

/// Exponential reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.backoff_initial_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.reconnect_attempts,
        }
    }

    /// Wait before attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// The whole schedule, one entry per attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |n| self.delay(n))
    }
}

/// Counts consecutive heartbeat misses.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    threshold: u32,
    consecutive_misses: u32,
    last_ok: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_misses: 0,
            last_ok: None,
        }
    }

    pub fn record_success(&mut self, at: Instant) {
        self.consecutive_misses = 0;
        self.last_ok = Some(at);
    }

    /// Returns `true` once the miss threshold is reached.
    pub fn record_miss(&mut self) -> bool {
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        self.consecutive_misses >= self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive_misses = 0;
    }

    pub fn misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_ok(&self) -> Option<Instant> {
        self.last_ok
    }
}

/// The open connection.  At most one exists per link; it is replaced
/// wholesale on reconnect.
pub struct DeviceSession {
    /// Write half.  `None` between teardown and the next successful connect.
    pub(crate) writer: Option<Box<dyn Write + Send>>,
    pub heartbeat: HeartbeatMonitor,
    pub backoff: ReconnectPolicy,
    pub device: Option<DeviceInfo>,
}

impl DeviceSession {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            writer: None,
            heartbeat: HeartbeatMonitor::new(config.miss_threshold),
            backoff: ReconnectPolicy::from_config(config),
            device: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}
