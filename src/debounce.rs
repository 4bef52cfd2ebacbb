//! Trigger debouncer.
//!
//! Filters duplicate and overlapping detections before they can start a
//! pipeline.  A reader held over a tag reports it many times per second;
//! only the first report inside the window counts.
//!
//! | Condition                                   | Result                  |
//! |---------------------------------------------|-------------------------|
//! | A pipeline is active                        | drop (`PipelineActive`) |
//! | Same tag as last accepted, inside window W  | drop (`DuplicateWithinWindow`) |
//! | Otherwise                                   | accept, pipeline active |
//!
//! Nothing is queued: a dropped event is gone.

use crate::app::pipeline::{TagCode, TriggerEvent};

/// Why [`Debouncer::check`] rejected an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PipelineActive,
    DuplicateWithinWindow,
    /// Set by the service, not the debouncer: shutdown is in progress.
    ShuttingDown,
    /// Set by the service: an earlier print call passed its deadline and
    /// has not returned yet.
    PrinterBusy,
}

impl DropReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipelineActive => "pipeline active",
            Self::DuplicateWithinWindow => "duplicate within window",
            Self::ShuttingDown => "shutting down",
            Self::PrinterBusy => "printer busy",
        }
    }
}

pub struct Debouncer {
    window_ms: u64,
    last_accepted: Option<(TagCode, u64)>,
    pipeline_active: bool,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_accepted: None,
            pipeline_active: false,
        }
    }

    /// `true` when the event should start a pipeline.  Acceptance marks the
    /// pipeline active until [`release`](Self::release).
    pub fn accept(&mut self, event: &TriggerEvent) -> bool {
        self.check(event).is_ok()
    }

    /// Same as [`accept`](Self::accept) but reports the rejection reason.
    pub fn check(&mut self, event: &TriggerEvent) -> Result<(), DropReason> {
        if self.pipeline_active {
            return Err(DropReason::PipelineActive);
        }
        if let Some((tag, at_ms)) = &self.last_accepted {
            let elapsed = event.observed_at_ms.saturating_sub(*at_ms);
            if *tag == event.tag && elapsed < self.window_ms {
                return Err(DropReason::DuplicateWithinWindow);
            }
        }
        self.last_accepted = Some((event.tag.clone(), event.observed_at_ms));
        self.pipeline_active = true;
        Ok(())
    }

    /// The active pipeline finished; new events may be accepted again.
    pub fn release(&mut self) {
        self.pipeline_active = false;
    }

    #[cfg(test)]
    pub(crate) fn is_pipeline_active(&self) -> bool {
        self.pipeline_active
    }
}
