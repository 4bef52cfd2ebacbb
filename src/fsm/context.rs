//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to: the clock, the active pipeline, worker outcomes delivered by
//! the service, and the effects the handlers request in return.  Think of
//! it as the "blackboard" in a blackboard architecture.

use crate::app::events::AppEvent;
use crate::app::pipeline::{
    GenerationJob, Notice, PipelineId, PipelineRequest, PipelineResult, PrintJob,
};
use crate::config::PipelineConfig;
use crate::debounce::Debouncer;
use crate::error::{GenerationError, PipelineFault, PrintError};

// ---------------------------------------------------------------------------
// Effects (written by state handlers; applied by the service)
// ---------------------------------------------------------------------------

/// Work the handlers ask the outside world to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartGeneration(GenerationJob),
    CancelGeneration(PipelineId),
    StartPrint(PrintJob),
    PrintNotice(Notice),
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

pub struct FsmContext {
    // -- Timing --
    /// Monotonic milliseconds, set by the service before each step.
    pub now_ms: u64,
    /// Value of `now_ms` when the current state was entered.
    pub state_entered_ms: u64,

    // -- Configuration --
    pub config: PipelineConfig,

    // -- Pipeline --
    pub debouncer: Debouncer,
    /// The one active pipeline, if any.
    pub pipeline: Option<PipelineRequest>,
    /// Generated text awaiting print.
    pub result: Option<PipelineResult>,
    /// Reason for the current `Error` state.
    pub fault: Option<PipelineFault>,
    /// A second observation of the pipeline's tag arrived while debouncing.
    pub confirmed: bool,

    // -- Worker outcomes (already filtered to the active pipeline) --
    pub generation_outcome: Option<Result<String, GenerationError>>,
    pub print_outcome: Option<Result<(), PrintError>>,
    /// Pipeline whose print call has not returned yet.  Outlives the
    /// pipeline when its print deadline passes.
    pub print_in_flight: Option<PipelineId>,

    pub shutdown_requested: bool,

    // -- Outputs --
    pub effects: Vec<Effect>,
    pub notices: Vec<AppEvent>,
}

impl FsmContext {
    pub fn new(config: PipelineConfig) -> Self {
        let debouncer = Debouncer::new(config.debounce_window_ms);
        Self {
            now_ms: 0,
            state_entered_ms: 0,
            config,
            debouncer,
            pipeline: None,
            result: None,
            fault: None,
            confirmed: false,
            generation_outcome: None,
            print_outcome: None,
            print_in_flight: None,
            shutdown_requested: false,
            effects: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Milliseconds since the current state was entered.
    pub fn ms_in_state(&self) -> u64 {
        self.now_ms.saturating_sub(self.state_entered_ms)
    }

    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline.as_ref().map(|p| p.id)
    }

    /// Arm the active pipeline's stage deadline `budget_ms` from now.
    pub fn arm_deadline(&mut self, budget_ms: u64) {
        let deadline = self.now_ms.saturating_add(budget_ms);
        if let Some(p) = self.pipeline.as_mut() {
            p.deadline_ms = deadline;
        }
    }

    /// `true` once the active stage deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|p| self.now_ms >= p.deadline_ms)
    }
}
