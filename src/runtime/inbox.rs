//! Control loop inbox.
//!
//! A bounded `embassy-sync` channel bridging the producer threads with the
//! control loop future.  The loop is the only consumer.
//!
//! ```text
//! ┌──────────────┐
//! │ ticker       │── Tick ─────────┐
//! │ push pump    │── Trigger ──────┤   ┌────────────┐   ┌──────────────┐
//! │ poller       │── Trigger ──────┼──▶│   Inbox    │──▶│ control loop │
//! │ workers      │── *Finished ────┤   │ (32 deep)  │   │  (async)     │
//! │ signal flag  │── Shutdown ─────┘   └────────────┘   └──────────────┘
//! └──────────────┘
//! ```

use std::thread;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{debug, warn};

use crate::app::commands::AppCommand;

/// Inbox depth.
pub const INBOX_DEPTH: usize = 32;

/// Retries for a command posted into a full inbox.
const POST_RETRIES: u32 = 50;
const POST_BACKOFF: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// Re-evaluate deadlines.
    Tick,
    Command(AppCommand),
}

pub struct Inbox {
    channel: Channel<CriticalSectionRawMutex, LoopEvent, INBOX_DEPTH>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Post a tick.  A full inbox means the loop already has work queued,
    /// so the tick is skipped.
    pub fn post_tick(&self) -> bool {
        self.channel.try_send(LoopEvent::Tick).is_ok()
    }

    /// Post a command, waiting briefly if the inbox is full.  Never blocks
    /// indefinitely; a command that still does not fit is dropped.
    pub fn post(&self, command: AppCommand) -> bool {
        let mut event = LoopEvent::Command(command);
        for _ in 0..POST_RETRIES {
            match self.channel.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    event = back;
                    thread::sleep(POST_BACKOFF);
                }
            }
        }
        warn!("inbox full; dropping {:?}", event);
        false
    }

    /// Next event, waiting as long as it takes.
    pub async fn next(&self) -> LoopEvent {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<LoopEvent> {
        let event = self.channel.try_receive().ok();
        if let Some(e) = &event {
            debug!("inbox: {:?}", e);
        }
        event
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}
