//! Concrete state handler functions and table builder.
//!
//! Each state is defined by plain `fn` pointers; no closures, no dynamic
//! dispatch.
//!
//! ```text
//!  IDLE ──[trigger accepted]──▶ DEBOUNCING ──[confirmed / window]──▶ GENERATING
//!    ▲                               │                                   │
//!    │◀────────[unconfirmed]─────────┘                              [text ready]
//!    │                                                                   ▼
//!    │◀─────────────────────────[printed]──────────────────────────── PRINTING
//!    │
//!    └──[display elapsed]── ERROR ◀──[timeout / fault]── GENERATING | PRINTING
//! ```
//!
//! Shutdown: `Generating` cancels and returns to `Idle` at once; `Printing`
//! waits for the print outcome or its deadline.

use std::time::Duration;

use super::context::{Effect, FsmContext};
use super::{StateDescriptor, StateId};
use crate::app::events::AppEvent;
use crate::app::pipeline::{GenerationJob, Notice, PipelineResult, PrintJob, text_lines};
use crate::error::PipelineFault;
use log::{debug, info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Debouncing
        StateDescriptor {
            id: StateId::Debouncing,
            name: "Debouncing",
            on_enter: Some(debouncing_enter),
            on_exit: None,
            on_update: debouncing_update,
        },
        // Index 2: Generating
        StateDescriptor {
            id: StateId::Generating,
            name: "Generating",
            on_enter: Some(generating_enter),
            on_exit: None,
            on_update: generating_update,
        },
        // Index 3: Printing
        StateDescriptor {
            id: StateId::Printing,
            name: "Printing",
            on_enter: Some(printing_enter),
            on_exit: Some(printing_exit),
            on_update: printing_update,
        },
        // Index 4: Error
        StateDescriptor {
            id: StateId::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: None,
            on_update: error_update,
        },
    ]
}

fn fail(ctx: &mut FsmContext, fault: PipelineFault) -> Option<StateId> {
    ctx.fault = Some(fault);
    Some(StateId::Error)
}

fn abandon(ctx: &mut FsmContext, reason: &'static str) -> Option<StateId> {
    if let Some(pipeline) = ctx.pipeline_id() {
        ctx.notices.push(AppEvent::PipelineAbandoned { pipeline, reason });
    }
    Some(StateId::Idle)
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state: the only state that accepts new triggers
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut FsmContext) {
    if let Some(p) = ctx.pipeline.take() {
        debug!("IDLE: pipeline {} closed", p.id);
        ctx.debouncer.release();
    }
    ctx.result = None;
    ctx.fault = None;
    ctx.confirmed = false;
    ctx.generation_outcome = None;
    ctx.print_outcome = None;
    info!("IDLE: waiting for a tag");
}

fn idle_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.pipeline.is_some() {
        return Some(StateId::Debouncing);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  DEBOUNCING state: short confirmation window before committing
// ═══════════════════════════════════════════════════════════════════════════

fn debouncing_enter(ctx: &mut FsmContext) {
    ctx.confirmed = false;
    ctx.arm_deadline(ctx.config.confirm_window_ms);
    if let Some(p) = ctx.pipeline.as_ref() {
        info!(
            "DEBOUNCING: tag {} (theme {}), confirming for {}ms",
            p.tag, p.theme, ctx.config.confirm_window_ms
        );
    }
}

fn debouncing_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.shutdown_requested {
        return abandon(ctx, "shutdown");
    }
    if ctx.confirmed {
        return Some(StateId::Generating);
    }
    if ctx.deadline_passed() {
        if ctx.config.require_confirmation {
            info!("DEBOUNCING: tag not confirmed, dropping");
            return abandon(ctx, "unconfirmed");
        }
        return Some(StateId::Generating);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  GENERATING state: text generation running on a worker
// ═══════════════════════════════════════════════════════════════════════════

fn generating_enter(ctx: &mut FsmContext) {
    let budget_ms = ctx.config.generation_timeout_ms;
    ctx.arm_deadline(budget_ms);
    ctx.generation_outcome = None;
    let Some(p) = ctx.pipeline.as_ref() else {
        return;
    };
    info!("GENERATING: pipeline {} theme {} ({}ms budget)", p.id, p.theme, budget_ms);
    let job = GenerationJob {
        pipeline: p.id,
        tag: p.tag.clone(),
        theme: p.theme.clone(),
        budget: Duration::from_millis(budget_ms),
    };
    ctx.effects.push(Effect::PrintNotice(Notice::Consulting));
    ctx.effects.push(Effect::StartGeneration(job));
}

fn generating_update(ctx: &mut FsmContext) -> Option<StateId> {
    let Some(id) = ctx.pipeline_id() else {
        return Some(StateId::Idle);
    };

    if ctx.shutdown_requested {
        ctx.effects.push(Effect::CancelGeneration(id));
        return abandon(ctx, "shutdown");
    }

    match ctx.generation_outcome.take() {
        Some(Ok(text)) => {
            let lines = text_lines(&text);
            if lines.is_empty() {
                warn!("GENERATING: backend returned no text");
                return fail(ctx, PipelineFault::GenerationFailed);
            }
            let p = ctx.pipeline.as_ref()?;
            ctx.result = Some(PipelineResult {
                text_lines: lines,
                theme: p.theme.clone(),
                tag: p.tag.clone(),
            });
            return Some(StateId::Printing);
        }
        Some(Err(e)) => {
            warn!("GENERATING: {}", e);
            return fail(ctx, PipelineFault::from(&e));
        }
        None => {}
    }

    if ctx.deadline_passed() {
        warn!("GENERATING: deadline passed, cancelling");
        ctx.effects.push(Effect::CancelGeneration(id));
        return fail(ctx, PipelineFault::GenerationTimeout);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  PRINTING state: receipt on a worker; shutdown waits for it
// ═══════════════════════════════════════════════════════════════════════════

fn printing_enter(ctx: &mut FsmContext) {
    ctx.arm_deadline(ctx.config.print_timeout_ms);
    ctx.print_outcome = None;
    let (Some(id), Some(document)) = (ctx.pipeline_id(), ctx.result.clone()) else {
        return;
    };
    info!("PRINTING: pipeline {} ({} lines)", id, document.text_lines.len());
    ctx.print_in_flight = Some(id);
    ctx.effects.push(Effect::StartPrint(PrintJob {
        pipeline: id,
        document,
    }));
}

fn printing_update(ctx: &mut FsmContext) -> Option<StateId> {
    let Some(id) = ctx.pipeline_id() else {
        return Some(StateId::Idle);
    };
    if ctx.result.is_none() {
        return fail(ctx, PipelineFault::PrintFault);
    }

    let outcome = ctx.print_outcome.take();
    if outcome.is_some() {
        ctx.print_in_flight = None;
    }
    match outcome {
        Some(Ok(())) => {
            let tag = ctx.pipeline.as_ref()?.tag.clone();
            ctx.notices.push(AppEvent::PipelineCompleted { pipeline: id, tag });
            return Some(StateId::Idle);
        }
        Some(Err(e)) => {
            warn!("PRINTING: {}", e);
            return fail(ctx, PipelineFault::from(&e));
        }
        None => {}
    }

    if ctx.deadline_passed() {
        // The call cannot be cancelled; new pipelines wait until it returns.
        warn!("PRINTING: deadline passed with the print call still running");
        return fail(ctx, PipelineFault::PrintTimeout);
    }
    None
}

fn printing_exit(ctx: &mut FsmContext) {
    ctx.result = None;
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR state: timed display, then unconditional reset
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &mut FsmContext) {
    ctx.arm_deadline(ctx.config.error_display_ms);
    let fault = ctx.fault.unwrap_or(PipelineFault::GenerationFailed);
    warn!(
        "ERROR: {}, holding for {}ms",
        fault, ctx.config.error_display_ms
    );
    if let Some(pipeline) = ctx.pipeline_id() {
        ctx.notices.push(AppEvent::PipelineFailed { pipeline, fault });
    }
    if matches!(fault, PipelineFault::GenerationFailed | PipelineFault::GenerationTimeout) {
        ctx.effects.push(Effect::PrintNotice(Notice::Unclear));
    }
}

fn error_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.shutdown_requested || ctx.deadline_passed() || ctx.pipeline.is_none() {
        return Some(StateId::Idle);
    }
    None
}
