//! Outbound application events.
//!
//! The [`FortuneService`](super::service::FortuneService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (log them, count them in tests).

use crate::app::pipeline::{PipelineId, TagCode, Theme};
use crate::debounce::DropReason;
use crate::error::PipelineFault;
use crate::fsm::OrchestratorState;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The service has started (carries initial state).
    Started(OrchestratorState),

    /// The FSM transitioned between states.
    StateChanged {
        from: OrchestratorState,
        to: OrchestratorState,
    },

    /// A trigger passed debounce and opened a pipeline.
    TriggerAccepted {
        pipeline: PipelineId,
        tag: TagCode,
        theme: Theme,
    },

    /// A trigger was dropped without any state change.
    TriggerDropped { tag: TagCode, reason: DropReason },

    /// Printed successfully; back to idle.
    PipelineCompleted { pipeline: PipelineId, tag: TagCode },

    /// The pipeline ended in the `Error` state.
    PipelineFailed {
        pipeline: PipelineId,
        fault: PipelineFault,
    },

    /// The pipeline was closed without a result (shutdown, unconfirmed tag).
    PipelineAbandoned {
        pipeline: PipelineId,
        reason: &'static str,
    },

    /// A worker reported for a pipeline that is no longer active.
    StaleOutcome { pipeline: PipelineId },

    ShutdownRequested,

    /// Shutdown complete; the control loop may exit.
    Stopped,
}
