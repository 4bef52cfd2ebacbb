//! Inbound commands to the application service.
//!
//! Everything that reaches the control loop besides the clock tick: device
//! detections, worker outcomes, and the shutdown request.  Producers run on
//! other threads and hand these over through the loop inbox.

use crate::app::pipeline::{PipelineId, TriggerEvent};
use crate::error::{GenerationError, PrintError};

/// Commands that adapters and workers send into the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// A tag detection from the device link.
    Trigger(TriggerEvent),

    /// The generation worker finished (successfully or not).
    GenerationFinished {
        pipeline: PipelineId,
        result: Result<String, GenerationError>,
    },

    /// The print worker finished (successfully or not).
    PrintFinished {
        pipeline: PipelineId,
        result: Result<(), PrintError>,
    },

    /// Stop accepting triggers and wind down.
    Shutdown,
}
