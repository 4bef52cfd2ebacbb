//! Device link: transport and protocol layer to the peripheral controller.
//!
//! ```text
//! ┌──────────────┐ Command (id) ┌──────────────┐  line  ┌────────────┐
//! │ send()       │─────────────▶│ writer mutex │───────▶│            │
//! │ caller waits │◀─────────────│ pending[id]  │◀───┐   │ controller │
//! └──────────────┘   Response   └──────────────┘    │   │  (serial)  │
//!                                ┌──────────────┐   │   │            │
//! subscribe() ◀── PushEvent ─────│ reader thread│◀──┴───│            │
//!                                └──────────────┘       └────────────┘
//! ```
//!
//! Inbound lines are demultiplexed on the presence of `"id"`: responses go
//! to the waiting caller, everything with `"event"` goes to subscribers.
//!
//! | Module      | Contents                                         |
//! |-------------|--------------------------------------------------|
//! | `protocol`  | Wire types, inbound classifier                   |
//! | `codec`     | Newline framing                                  |
//! | `transport` | `Connector` seam                                 |
//! | `serial`    | `serialport` connector                           |
//! | `session`   | Heartbeat watchdog, reconnect backoff            |
//! | `client`    | `SerialDeviceLink`, the real implementation      |
//! | `loopback`  | In-memory connector with a scriptable device end |

pub mod client;
pub mod codec;
pub mod loopback;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use protocol::{DeviceInfo, PushEvent};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    /// Session lost; backoff and reconnect in progress.
    Reconnecting,
    /// Reconnect attempts exhausted.  Writes fail fast, no push events.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub consecutive_misses: u32,
    /// Firmware details from the last successful handshake.
    pub device: Option<DeviceInfo>,
}

/// Unbounded, non-restartable stream of push events.
///
/// Iteration blocks until the next event and ends when the link stops
/// delivering (degraded mode or link dropped).
pub struct PushEvents {
    rx: Receiver<PushEvent>,
}

impl PushEvents {
    pub fn new(rx: Receiver<PushEvent>) -> Self {
        Self { rx }
    }

    /// A stream that is already finished.
    pub fn closed() -> Self {
        let (_, rx) = crossbeam::channel::unbounded();
        Self { rx }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<PushEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Iterator for PushEvents {
    type Item = PushEvent;

    fn next(&mut self) -> Option<PushEvent> {
        self.rx.recv().ok()
    }
}

/// Waits between reconnect attempts.  Replaced in tests to observe the
/// backoff schedule without waiting it out.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`, returning early once `running` is cleared.
    fn sleep(&self, duration: Duration, running: &AtomicBool);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, running: &AtomicBool) {
        sleep_while(duration, running);
    }
}

/// Sleep in short slices; `false` if `running` was cleared first.
pub fn sleep_while(duration: Duration, running: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(20);
    let mut left = duration;
    while !left.is_zero() {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let step = left.min(SLICE);
        std::thread::sleep(step);
        left -= step;
    }
    running.load(Ordering::Acquire)
}

/// Lock, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
