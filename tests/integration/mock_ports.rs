//! Recording port implementations for orchestrator tests.
//!
//! Records every outbound call so tests can assert on the full command
//! history without threads, devices, or processes.

use std::time::Duration;

use divinofax::app::events::AppEvent;
use divinofax::app::pipeline::{GenerationJob, Notice, PipelineId, PrintJob, TagCode, Theme};
use divinofax::app::ports::{EventSink, LightPort, ThemeResolver, WorkerPort};
use divinofax::drivers::light::LightCommand;
use divinofax::link::Sleeper;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

// ── Port call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PortCall {
    SetLight(LightCommand),
    StartGeneration(GenerationJob),
    CancelGeneration(PipelineId),
    StartPrint(PrintJob),
    PrintNotice(Notice),
}

// ── MockPorts ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPorts {
    pub calls: Vec<PortCall>,
}

#[allow(dead_code)]
impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lights(&self) -> Vec<LightCommand> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                PortCall::SetLight(l) => Some(*l),
                _ => None,
            })
            .collect()
    }

    pub fn generations(&self) -> Vec<&GenerationJob> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                PortCall::StartGeneration(job) => Some(job),
                _ => None,
            })
            .collect()
    }

    pub fn prints(&self) -> Vec<&PrintJob> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                PortCall::StartPrint(job) => Some(job),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                PortCall::PrintNotice(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl LightPort for MockPorts {
    fn set_light(&mut self, command: LightCommand) {
        self.calls.push(PortCall::SetLight(command));
    }
}

impl WorkerPort for MockPorts {
    fn start_generation(&mut self, job: GenerationJob) {
        self.calls.push(PortCall::StartGeneration(job));
    }

    fn cancel_generation(&mut self, pipeline: PipelineId) {
        self.calls.push(PortCall::CancelGeneration(pipeline));
    }

    fn start_print(&mut self, job: PrintJob) {
        self.calls.push(PortCall::StartPrint(job));
    }

    fn print_notice(&mut self, notice: Notice) {
        self.calls.push(PortCall::PrintNotice(notice));
    }
}

impl ThemeResolver for MockPorts {
    fn resolve(&self, tag: &TagCode) -> Option<Theme> {
        match tag.as_str() {
            "001" => Some(Theme::new("cosmic")),
            "002" => Some(Theme::new("ocean")),
            _ => None,
        }
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Sleeper ───────────────────────────────────────────────────

/// Records reconnect delays instead of waiting them out.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    pub delays: Arc<Mutex<Vec<Duration>>>,
}

#[allow(dead_code)]
impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _running: &AtomicBool) {
        self.delays.lock().unwrap().push(duration);
    }
}
