//! End-to-end pipeline scenarios driven through `FortuneService` with
//! recording ports and an explicit clock.

use super::mock_ports::{MockPorts, PortCall, RecordingSink};

use divinofax::app::commands::AppCommand;
use divinofax::app::events::AppEvent;
use divinofax::app::pipeline::{Notice, PipelineId, TriggerEvent, tag_code};
use divinofax::app::service::FortuneService;
use divinofax::config::PipelineConfig;
use divinofax::debounce::DropReason;
use divinofax::drivers::light::{LIGHT_BUSY, LIGHT_ERROR, LIGHT_IDLE, LIGHT_PRINTING};
use divinofax::error::{GenerationError, PipelineFault, PrintError};
use divinofax::fsm::OrchestratorState;

const CONFIRM_MS: u64 = 250;

fn make_service() -> (FortuneService, MockPorts, RecordingSink) {
    let mut svc = FortuneService::new(PipelineConfig::default());
    let mut hw = MockPorts::new();
    let mut sink = RecordingSink::new();
    svc.start(0, &mut hw, &mut sink);
    (svc, hw, sink)
}

fn trigger(tag: &str, at_ms: u64) -> AppCommand {
    AppCommand::Trigger(TriggerEvent::new(tag_code(tag).unwrap(), at_ms))
}

fn generated(id: u32, text: &str) -> AppCommand {
    AppCommand::GenerationFinished {
        pipeline: PipelineId(id),
        result: Ok(text.into()),
    }
}

fn printed(id: u32) -> AppCommand {
    AppCommand::PrintFinished {
        pipeline: PipelineId(id),
        result: Ok(()),
    }
}

/// Drive a fresh service into `Printing` for tag "001".
fn into_printing() -> (FortuneService, MockPorts, RecordingSink) {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    svc.handle_command(generated(1, "Stars whisper\nDestiny awaits"), 1_000, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Printing);
    (svc, hw, sink)
}

// ── Scenario A: happy path ────────────────────────────────────

#[test]
fn scenario_a_tag_to_receipt() {
    let (mut svc, mut hw, mut sink) = make_service();
    assert_eq!(hw.lights(), vec![LIGHT_IDLE]);

    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Debouncing);
    assert_eq!(hw.lights().last(), Some(&LIGHT_BUSY));

    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Generating);
    let jobs = hw.generations();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].pipeline, PipelineId(1));
    assert_eq!(jobs[0].theme.as_str(), "cosmic");

    svc.handle_command(generated(1, "Stars whisper\nDestiny awaits"), 5_000, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Printing);
    assert_eq!(hw.lights().last(), Some(&LIGHT_PRINTING));
    let prints = hw.prints();
    assert_eq!(prints.len(), 1);
    assert_eq!(
        prints[0].document.text_lines,
        vec!["Stars whisper".to_string(), "Destiny awaits".to_string()]
    );

    svc.handle_command(printed(1), 7_000, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert_eq!(
        hw.lights(),
        vec![LIGHT_IDLE, LIGHT_BUSY, LIGHT_PRINTING, LIGHT_IDLE]
    );
    assert!(sink.contains(&AppEvent::PipelineCompleted {
        pipeline: PipelineId(1),
        tag: tag_code("001").unwrap(),
    }));
    assert!(svc.active_pipeline().is_none());
}

// ── Scenario B: drop while busy ───────────────────────────────

#[test]
fn scenario_b_tag_while_printing_is_dropped() {
    let (mut svc, mut hw, mut sink) = into_printing();
    hw.clear();

    svc.handle_command(trigger("002", 1_500), 1_500, &mut hw, &mut sink);

    assert_eq!(svc.state(), OrchestratorState::Printing);
    assert!(hw.calls.is_empty(), "no commands beyond the in-flight print");
    assert!(sink.contains(&AppEvent::TriggerDropped {
        tag: tag_code("002").unwrap(),
        reason: DropReason::PipelineActive,
    }));
    assert_eq!(svc.pipelines_started(), 1);
}

#[test]
fn tags_during_debounce_and_generation_are_dropped() {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.handle_command(trigger("002", 10), 10, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Debouncing);

    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    svc.handle_command(trigger("002", 300), 300, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Generating);
    assert_eq!(svc.active_pipeline().unwrap().tag.as_str(), "001");
    assert_eq!(hw.generations().len(), 1);
}

// ── Scenario D: generation timeout ────────────────────────────

#[test]
fn scenario_d_generation_timeout_recovers() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = make_service();

    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Generating);

    // The loop keeps ticking while the generator is silent.
    let mut now = CONFIRM_MS;
    while now < CONFIRM_MS + config.generation_timeout_ms - 100 {
        now += 100;
        svc.tick(now, &mut hw, &mut sink);
        assert_eq!(svc.state(), OrchestratorState::Generating);
    }

    let timed_out = CONFIRM_MS + config.generation_timeout_ms;
    svc.tick(timed_out, &mut hw, &mut sink);
    assert_eq!(
        svc.state(),
        OrchestratorState::Error(PipelineFault::GenerationTimeout)
    );
    assert!(hw.calls.contains(&PortCall::CancelGeneration(PipelineId(1))));
    assert_eq!(hw.lights().last(), Some(&LIGHT_ERROR));

    svc.tick(timed_out + config.error_display_ms - 1, &mut hw, &mut sink);
    assert!(matches!(svc.state(), OrchestratorState::Error(_)));

    svc.tick(timed_out + config.error_display_ms, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert_eq!(hw.lights().last(), Some(&LIGHT_IDLE));

    let path: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        path,
        vec![
            OrchestratorState::Debouncing,
            OrchestratorState::Generating,
            OrchestratorState::Error(PipelineFault::GenerationTimeout),
            OrchestratorState::Idle,
        ]
    );
}

#[test]
fn late_generation_outcome_after_timeout_is_stale() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    let timed_out = CONFIRM_MS + config.generation_timeout_ms;
    svc.tick(timed_out, &mut hw, &mut sink);

    svc.handle_command(generated(1, "too late"), timed_out + 10, &mut hw, &mut sink);
    assert!(matches!(svc.state(), OrchestratorState::Error(_)));
    assert!(hw.prints().is_empty());
    assert!(sink.contains(&AppEvent::StaleOutcome {
        pipeline: PipelineId(1)
    }));
}

// ── Failures ──────────────────────────────────────────────────

#[test]
fn generation_failure_enters_error() {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    svc.handle_command(
        AppCommand::GenerationFinished {
            pipeline: PipelineId(1),
            result: Err(GenerationError::BackendFailure("boom".into())),
        },
        400,
        &mut hw,
        &mut sink,
    );
    assert_eq!(
        svc.state(),
        OrchestratorState::Error(PipelineFault::GenerationFailed)
    );
    assert!(sink.contains(&AppEvent::PipelineFailed {
        pipeline: PipelineId(1),
        fault: PipelineFault::GenerationFailed,
    }));
}

#[test]
fn blank_generation_is_a_failure() {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    svc.handle_command(generated(1, "  \n \n"), 400, &mut hw, &mut sink);
    assert_eq!(
        svc.state(),
        OrchestratorState::Error(PipelineFault::GenerationFailed)
    );
    assert!(hw.prints().is_empty());
}

#[test]
fn print_fault_enters_error_then_idle() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = into_printing();
    svc.handle_command(
        AppCommand::PrintFinished {
            pipeline: PipelineId(1),
            result: Err(PrintError::fault("paper out")),
        },
        2_000,
        &mut hw,
        &mut sink,
    );
    assert_eq!(svc.state(), OrchestratorState::Error(PipelineFault::PrintFault));

    // Tags are still refused while the error is displayed.
    svc.handle_command(trigger("002", 2_100), 2_100, &mut hw, &mut sink);
    assert!(matches!(svc.state(), OrchestratorState::Error(_)));

    svc.tick(2_000 + config.error_display_ms, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
}

#[test]
fn print_deadline_enters_print_timeout() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = into_printing();
    svc.tick(1_000 + config.print_timeout_ms, &mut hw, &mut sink);
    assert_eq!(
        svc.state(),
        OrchestratorState::Error(PipelineFault::PrintTimeout)
    );
}

#[test]
fn print_running_past_its_deadline_holds_off_the_next_pipeline() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = into_printing();

    let timed_out = 1_000 + config.print_timeout_ms;
    svc.tick(timed_out, &mut hw, &mut sink);
    assert_eq!(
        svc.state(),
        OrchestratorState::Error(PipelineFault::PrintTimeout)
    );
    let cleared = timed_out + config.error_display_ms;
    svc.tick(cleared, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    hw.clear();

    // The first print call has not returned: the printer is still taken.
    svc.handle_command(trigger("002", cleared + 10), cleared + 10, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert!(hw.calls.is_empty());
    assert_eq!(svc.pipelines_started(), 1);
    assert!(sink.contains(&AppEvent::TriggerDropped {
        tag: tag_code("002").unwrap(),
        reason: DropReason::PrinterBusy,
    }));

    svc.handle_command(printed(1), cleared + 500, &mut hw, &mut sink);
    assert!(sink.contains(&AppEvent::StaleOutcome {
        pipeline: PipelineId(1)
    }));
    assert_eq!(svc.state(), OrchestratorState::Idle);

    svc.handle_command(trigger("002", cleared + 600), cleared + 600, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Debouncing);
    assert_eq!(svc.active_pipeline().unwrap().id, PipelineId(2));
}

#[test]
fn generation_running_past_its_deadline_does_not_hold_off_the_next_pipeline() {
    let config = PipelineConfig::default();
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    let timed_out = CONFIRM_MS + config.generation_timeout_ms;
    svc.tick(timed_out, &mut hw, &mut sink);
    svc.tick(timed_out + config.error_display_ms, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);

    // Generation is cancelled at its deadline, so the next tag goes ahead
    // even though the old call has not reported yet.
    let next = timed_out + config.error_display_ms + 10;
    svc.handle_command(trigger("002", next), next, &mut hw, &mut sink);
    svc.tick(next + CONFIRM_MS, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Generating);

    svc.handle_command(generated(1, "late"), next + 300, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Generating);
    assert!(hw.prints().is_empty());
    let ids: Vec<_> = hw.generations().iter().map(|j| j.pipeline).collect();
    assert_eq!(ids, vec![PipelineId(1), PipelineId(2)]);
}

// ── Notices ───────────────────────────────────────────────────

#[test]
fn notices_follow_the_pipeline() {
    let (mut svc, mut hw, mut sink) = make_service();
    assert_eq!(hw.notices(), vec![Notice::Online]);

    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    assert_eq!(hw.notices(), vec![Notice::Online, Notice::Consulting]);

    svc.handle_command(
        AppCommand::GenerationFinished {
            pipeline: PipelineId(1),
            result: Err(GenerationError::BackendFailure("boom".into())),
        },
        400,
        &mut hw,
        &mut sink,
    );
    assert_eq!(
        hw.notices(),
        vec![Notice::Online, Notice::Consulting, Notice::Unclear]
    );
}

// ── Debounce ──────────────────────────────────────────────────

#[test]
fn same_tag_inside_window_is_suppressed_after_completion() {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    svc.handle_command(generated(1, "one"), 300, &mut hw, &mut sink);
    svc.handle_command(printed(1), 400, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);

    svc.handle_command(trigger("001", 500), 500, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert!(sink.contains(&AppEvent::TriggerDropped {
        tag: tag_code("001").unwrap(),
        reason: DropReason::DuplicateWithinWindow,
    }));

    svc.handle_command(trigger("002", 600), 600, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Debouncing);
    assert_eq!(svc.active_pipeline().unwrap().theme.as_str(), "ocean");
}

#[test]
fn unconfirmed_tag_is_abandoned_when_confirmation_required() {
    let config = PipelineConfig {
        require_confirmation: true,
        ..PipelineConfig::default()
    };
    let mut svc = FortuneService::new(config);
    let mut hw = MockPorts::new();
    let mut sink = RecordingSink::new();
    svc.start(0, &mut hw, &mut sink);

    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert!(hw.generations().is_empty());
    assert!(sink.contains(&AppEvent::PipelineAbandoned {
        pipeline: PipelineId(1),
        reason: "unconfirmed",
    }));
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn shutdown_cancels_generation() {
    let (mut svc, mut hw, mut sink) = make_service();
    svc.handle_command(trigger("001", 0), 0, &mut hw, &mut sink);
    svc.tick(CONFIRM_MS, &mut hw, &mut sink);

    svc.handle_command(AppCommand::Shutdown, 500, &mut hw, &mut sink);
    assert!(hw.calls.contains(&PortCall::CancelGeneration(PipelineId(1))));
    assert_eq!(svc.state(), OrchestratorState::Idle);
    assert!(svc.is_stopped());
    assert!(sink.contains(&AppEvent::Stopped));
}

#[test]
fn shutdown_waits_for_in_flight_print() {
    let (mut svc, mut hw, mut sink) = into_printing();
    svc.handle_command(AppCommand::Shutdown, 1_500, &mut hw, &mut sink);
    assert_eq!(svc.state(), OrchestratorState::Printing);
    assert!(!svc.is_stopped());

    svc.handle_command(trigger("002", 1_600), 1_600, &mut hw, &mut sink);
    assert!(sink.contains(&AppEvent::TriggerDropped {
        tag: tag_code("002").unwrap(),
        reason: DropReason::ShuttingDown,
    }));

    svc.handle_command(printed(1), 2_000, &mut hw, &mut sink);
    assert!(svc.is_stopped());
    assert!(sink.contains(&AppEvent::PipelineCompleted {
        pipeline: PipelineId(1),
        tag: tag_code("001").unwrap(),
    }));
}
