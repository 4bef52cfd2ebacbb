//! Application service: the hexagonal core.
//!
//! [`FortuneService`] owns the FSM and its context.  It is driven entirely
//! by explicit inputs (commands, ticks, the current monotonic time) and
//! talks to the world only through port traits passed in at call sites, so
//! every scenario can be replayed deterministically in tests.
//!
//! ```text
//!  AppCommand ──▶ ┌──────────────────────────┐ ──▶ LightPort
//!  tick(now)  ──▶ │     FortuneService       │ ──▶ WorkerPort
//!                 │  Debouncer · FSM · ctx   │ ──▶ EventSink
//!  ThemeResolver ─┤                          │
//!                 └──────────────────────────┘
//! ```
//!
//! After every input the FSM is stepped until it settles; one input may
//! cascade through several states (e.g. `Idle → Debouncing → Generating`
//! with a zero confirmation window).

use log::{debug, info};

use crate::app::pipeline::{Notice, PipelineId, PipelineRequest, Theme, TriggerEvent};
use crate::config::PipelineConfig;
use crate::debounce::DropReason;
use crate::drivers::light::{LightCommand, light_for};
use crate::fsm::context::{Effect, FsmContext};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, OrchestratorState, StateId};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{EventSink, LightPort, ThemeResolver, WorkerPort};

/// Upper bound on transitions evaluated for one input.
const MAX_CASCADE: usize = StateId::COUNT * 2;

// ───────────────────────────────────────────────────────────────
// FortuneService
// ───────────────────────────────────────────────────────────────

pub struct FortuneService {
    fsm: Fsm,
    ctx: FsmContext,
    default_theme: Theme,
    pipelines_started: u32,
    last_light: Option<LightCommand>,
    stopped: bool,
}

impl FortuneService {
    /// Construct the service.  Does **not** start the FSM; call [`start`](Self::start).
    pub fn new(config: PipelineConfig) -> Self {
        let default_theme = Theme::new(config.default_theme.clone());
        Self {
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx: FsmContext::new(config),
            default_theme,
            pipelines_started: 0,
            last_light: None,
            stopped: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(
        &mut self,
        now_ms: u64,
        hw: &mut (impl LightPort + WorkerPort),
        sink: &mut impl EventSink,
    ) {
        self.ctx.now_ms = now_ms;
        self.fsm.start(&mut self.ctx);
        sink.emit(&AppEvent::Started(self.state()));
        info!("FortuneService started in {:?}", self.state());
        self.apply_light(hw);
        hw.print_notice(Notice::Online);
    }

    // ── Inputs ────────────────────────────────────────────────

    /// Process one inbound command, then settle the FSM.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        now_ms: u64,
        hw: &mut (impl LightPort + WorkerPort + ThemeResolver),
        sink: &mut impl EventSink,
    ) {
        self.advance_clock(now_ms);
        match cmd {
            AppCommand::Trigger(event) => self.on_trigger(event, &*hw, sink),
            AppCommand::GenerationFinished { pipeline, result } => {
                if self.is_current(pipeline, StateId::Generating) {
                    self.ctx.generation_outcome = Some(result);
                } else {
                    debug!("Discarding stale generation outcome for {}", pipeline);
                    sink.emit(&AppEvent::StaleOutcome { pipeline });
                }
            }
            AppCommand::PrintFinished { pipeline, result } => {
                if self.ctx.print_in_flight == Some(pipeline) {
                    self.ctx.print_in_flight = None;
                }
                if self.is_current(pipeline, StateId::Printing) {
                    self.ctx.print_outcome = Some(result);
                } else {
                    debug!("Discarding stale print outcome for {}", pipeline);
                    sink.emit(&AppEvent::StaleOutcome { pipeline });
                }
            }
            AppCommand::Shutdown => {
                if !self.ctx.shutdown_requested {
                    info!("Shutdown requested in {:?}", self.state());
                    self.ctx.shutdown_requested = true;
                    sink.emit(&AppEvent::ShutdownRequested);
                }
            }
        }
        self.settle(hw, sink);
    }

    /// Clock tick: re-evaluate deadlines.
    pub fn tick(
        &mut self,
        now_ms: u64,
        hw: &mut (impl LightPort + WorkerPort),
        sink: &mut impl EventSink,
    ) {
        self.advance_clock(now_ms);
        self.settle(hw, sink);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> OrchestratorState {
        match self.fsm.current_state() {
            StateId::Idle => OrchestratorState::Idle,
            StateId::Debouncing => OrchestratorState::Debouncing,
            StateId::Generating => OrchestratorState::Generating,
            StateId::Printing => OrchestratorState::Printing,
            StateId::Error => OrchestratorState::Error(
                self.ctx
                    .fault
                    .unwrap_or(crate::error::PipelineFault::GenerationFailed),
            ),
        }
    }

    pub fn active_pipeline(&self) -> Option<&PipelineRequest> {
        self.ctx.pipeline.as_ref()
    }

    /// Pipelines opened since startup.
    pub fn pipelines_started(&self) -> u32 {
        self.pipelines_started
    }

    /// Shutdown was requested and the FSM has wound down to `Idle`.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    // ── Internal ──────────────────────────────────────────────

    fn advance_clock(&mut self, now_ms: u64) {
        // Producers stamp events on other threads; never run the clock backwards.
        self.ctx.now_ms = self.ctx.now_ms.max(now_ms);
    }

    fn is_current(&self, pipeline: PipelineId, state: StateId) -> bool {
        self.ctx.pipeline_id() == Some(pipeline) && self.fsm.current_state() == state
    }

    fn on_trigger(
        &mut self,
        event: TriggerEvent,
        hw: &impl ThemeResolver,
        sink: &mut impl EventSink,
    ) {
        if self.ctx.shutdown_requested {
            self.drop_trigger(event, DropReason::ShuttingDown, sink);
            return;
        }

        // A repeat of the pipeline's own tag while debouncing confirms it.
        if self.fsm.current_state() == StateId::Debouncing
            && self
                .ctx
                .pipeline
                .as_ref()
                .is_some_and(|p| p.tag == event.tag)
        {
            debug!("Tag {} confirmed", event.tag);
            self.ctx.confirmed = true;
            return;
        }

        // Elsewhere the debouncer already refuses with `PipelineActive`.
        if let (StateId::Idle, Some(pipeline)) =
            (self.fsm.current_state(), self.ctx.print_in_flight)
        {
            debug!("Print for {} still running", pipeline);
            self.drop_trigger(event, DropReason::PrinterBusy, sink);
            return;
        }

        if let Err(reason) = self.ctx.debouncer.check(&event) {
            self.drop_trigger(event, reason, sink);
            return;
        }

        let theme = hw
            .resolve(&event.tag)
            .unwrap_or_else(|| self.default_theme.clone());
        self.pipelines_started += 1;
        let id = PipelineId(self.pipelines_started);
        info!("Trigger {} accepted as pipeline {} (theme {})", event.tag, id, theme);
        sink.emit(&AppEvent::TriggerAccepted {
            pipeline: id,
            tag: event.tag.clone(),
            theme: theme.clone(),
        });
        self.ctx.pipeline = Some(PipelineRequest {
            id,
            tag: event.tag,
            theme,
            accepted_at_ms: self.ctx.now_ms,
            deadline_ms: self.ctx.now_ms,
        });
    }

    fn drop_trigger(&self, event: TriggerEvent, reason: DropReason, sink: &mut impl EventSink) {
        debug!(
            "Trigger {} dropped in {:?}: {}",
            event.tag,
            self.state(),
            reason.as_str()
        );
        sink.emit(&AppEvent::TriggerDropped {
            tag: event.tag,
            reason,
        });
    }

    /// Step the FSM until it stops moving, then apply what it asked for.
    fn settle(&mut self, hw: &mut (impl LightPort + WorkerPort), sink: &mut impl EventSink) {
        for _ in 0..MAX_CASCADE {
            let from = self.state();
            if self.fsm.step(&mut self.ctx).is_none() {
                break;
            }
            sink.emit(&AppEvent::StateChanged {
                from,
                to: self.state(),
            });
            self.apply_light(hw);
        }

        for effect in self.ctx.effects.drain(..) {
            match effect {
                Effect::StartGeneration(job) => hw.start_generation(job),
                Effect::CancelGeneration(id) => hw.cancel_generation(id),
                Effect::StartPrint(job) => hw.start_print(job),
                Effect::PrintNotice(notice) => hw.print_notice(notice),
            }
        }
        for notice in self.ctx.notices.drain(..) {
            sink.emit(&notice);
        }

        if self.ctx.shutdown_requested
            && !self.stopped
            && self.fsm.current_state() == StateId::Idle
        {
            self.stopped = true;
            info!("FortuneService stopped");
            sink.emit(&AppEvent::Stopped);
        }
    }

    fn apply_light(&mut self, hw: &mut impl LightPort) {
        let command = light_for(self.state());
        if self.last_light != Some(command) {
            hw.set_light(command);
            self.last_light = Some(command);
        }
    }
}
