//! Full runtime against simulated backends: helper threads, inbox, and the
//! block_on control loop, end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::mock_ports::RecordingSink;

use divinofax::adapters::themes::ThemeTable;
use divinofax::app::events::AppEvent;
use divinofax::app::pipeline::{Notice, PipelineId, PipelineResult, Theme, tag_code};
use divinofax::app::ports::{DeviceLink, PrintAdapter};
use divinofax::config::SystemConfig;
use divinofax::debounce::DropReason;
use divinofax::drivers::light::{LIGHT_IDLE, LIGHT_PRINTING};
use divinofax::error::{PipelineFault, PrintError};
use divinofax::fsm::OrchestratorState;
use divinofax::runtime::{Backends, RunSummary, Runtime};
use divinofax::sim::{CannedGenerator, SimulatedDeviceLink};

#[derive(Clone, Default)]
struct RecordingPrinter {
    printed: Arc<Mutex<Vec<PipelineResult>>>,
    notices: Arc<Mutex<Vec<Notice>>>,
    /// Time each call takes.
    delay: Duration,
    active: Arc<AtomicUsize>,
    /// Most calls seen running at once.
    peak: Arc<AtomicUsize>,
}

impl RecordingPrinter {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.printed.lock().unwrap().len()
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn busy(&self) {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PrintAdapter for RecordingPrinter {
    fn print(&self, document: &PipelineResult) -> Result<(), PrintError> {
        self.busy();
        self.printed.lock().unwrap().push(document.clone());
        Ok(())
    }

    fn print_notice(&self, notice: Notice) -> Result<(), PrintError> {
        self.busy();
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

fn fast_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.pipeline.tick_interval_ms = 10;
    config.pipeline.confirm_window_ms = 20;
    config.pipeline.error_display_ms = 100;
    config.lights.startup_sequence = false;
    config.sim.tags = Vec::new();
    config.sim.tag_interval_ms = 60_000;
    config
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let started = Instant::now();
    while !cond() {
        assert!(started.elapsed() < Duration::from_secs(10), "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

/// Run the control loop on its own thread.
fn spawn_run(runtime: Runtime) -> thread::JoinHandle<(RunSummary, RecordingSink)> {
    thread::spawn(move || {
        let mut sink = RecordingSink::new();
        let summary = runtime.run_with_sink(&mut sink).unwrap();
        (summary, sink)
    })
}

#[test]
fn pushed_tag_is_printed_end_to_end() {
    let config = fast_config();
    let device = Arc::new(SimulatedDeviceLink::new(&config.sim));
    let printer = RecordingPrinter::default();
    let themes = ThemeTable::new([("001".to_string(), Theme::new("cosmic"))].into());
    let backends = Backends {
        link: device.clone(),
        generator: Arc::new(CannedGenerator::with_texts(vec!["Line one\nLine two".into()])),
        printer: Arc::new(printer.clone()),
        themes,
    };

    let runtime = Runtime::start(&config, backends).unwrap();
    let handle = runtime.handle();
    let run = spawn_run(runtime);

    device.inject("001");
    wait_until("receipt", || printer.count() == 1);
    wait_until("idle light", || {
        let lights = device.lights();
        lights.contains(&LIGHT_PRINTING) && lights.last() == Some(&LIGHT_IDLE)
    });

    handle.request_shutdown();
    let (summary, sink) = run.join().unwrap();
    assert_eq!(summary.pipelines_started, 1);
    assert_eq!(summary.final_state, OrchestratorState::Idle);

    let printed = printer.printed.lock().unwrap();
    assert_eq!(printed[0].text_lines, vec!["Line one".to_string(), "Line two".to_string()]);
    assert_eq!(printed[0].theme.as_str(), "cosmic");
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AppEvent::PipelineCompleted { pipeline, .. } if *pipeline == PipelineId(1)
    )));
    assert_eq!(sink.events.last(), Some(&AppEvent::Stopped));
}

#[test]
fn slow_generation_times_out_and_loop_stays_live() {
    let mut config = fast_config();
    config.pipeline.generation_timeout_ms = 200;
    let device = Arc::new(SimulatedDeviceLink::new(&config.sim));
    let printer = RecordingPrinter::default();
    let backends = Backends {
        link: device.clone(),
        generator: Arc::new(CannedGenerator::new().with_delay(Duration::from_secs(30))),
        printer: Arc::new(printer.clone()),
        themes: ThemeTable::default(),
    };

    let runtime = Runtime::start(&config, backends).unwrap();
    let handle = runtime.handle();
    let run = spawn_run(runtime);

    assert!(handle.inject_tag("001"));
    // Error display is 100 ms; the light returns to idle after it.
    wait_until("error then idle", || {
        let lights = device.lights();
        lights.iter().any(|l| l.color == divinofax::drivers::light::Color::Red)
            && lights.last() == Some(&LIGHT_IDLE)
    });

    // A second tag is accepted once the error has cleared.
    assert!(handle.inject_tag("002"));
    thread::sleep(Duration::from_millis(50));
    handle.request_shutdown();

    let (summary, sink) = run.join().unwrap();
    assert_eq!(summary.pipelines_started, 2);
    assert_eq!(printer.count(), 0);
    assert!(sink.events.contains(&AppEvent::PipelineFailed {
        pipeline: PipelineId(1),
        fault: PipelineFault::GenerationTimeout,
    }));
}

#[test]
fn shutdown_in_idle_returns_promptly() {
    let config = fast_config();
    let link: Arc<dyn DeviceLink> = Arc::new(SimulatedDeviceLink::new(&config.sim));
    let backends = Backends {
        link: Arc::clone(&link),
        generator: Arc::new(CannedGenerator::new()),
        printer: Arc::new(RecordingPrinter::default()),
        themes: ThemeTable::default(),
    };
    let runtime = Runtime::start(&config, backends).unwrap();
    assert_eq!(link.status().device.unwrap().firmware_version, "sim-1.0");
    runtime.shutdown_flag().store(true, Ordering::Release);

    let started = Instant::now();
    let (summary, _sink) = spawn_run(runtime).join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.pipelines_started, 0);
}

#[test]
fn simulation_mode_from_config_writes_receipts_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let receipts = dir.path().join("receipts.txt");

    let mut config = fast_config();
    config.system.simulation_mode = true;
    config.sim.tags = vec!["001".into()];
    config.sim.tag_interval_ms = 50;
    config.printer.output_file = Some(receipts.to_string_lossy().into_owned());

    let backends = Backends::from_config(&config).unwrap();
    let runtime = Runtime::start(&config, backends).unwrap();
    let handle = runtime.handle();
    let run = spawn_run(runtime);

    wait_until("receipt file", || {
        std::fs::read_to_string(&receipts).is_ok_and(|s| s.contains("--- fortune 001 (generic) ---"))
    });
    // Let a few more pushes of the same tag arrive.
    thread::sleep(Duration::from_millis(250));
    handle.request_shutdown();
    let (summary, sink) = run.join().unwrap();

    // The same tag keeps arriving; the debounce window holds it to one pipeline.
    assert_eq!(summary.pipelines_started, 1);
    assert!(sink.events.iter().any(|e| matches!(e, AppEvent::TriggerDropped { .. })));
}

#[test]
fn print_past_its_deadline_blocks_the_next_pipeline_until_it_returns() {
    let mut config = fast_config();
    config.pipeline.print_timeout_ms = 100;
    let device = Arc::new(SimulatedDeviceLink::new(&config.sim));
    let printer = RecordingPrinter::slow(Duration::from_millis(800));
    let backends = Backends {
        link: device.clone(),
        generator: Arc::new(CannedGenerator::new()),
        printer: Arc::new(printer.clone()),
        themes: ThemeTable::default(),
    };

    let runtime = Runtime::start(&config, backends).unwrap();
    let handle = runtime.handle();
    let run = spawn_run(runtime);

    assert!(handle.inject_tag("001"));
    // Print deadline at ~100 ms, error cleared at ~200 ms; the call itself
    // is still blocked in the printer.
    thread::sleep(Duration::from_millis(400));
    assert!(handle.inject_tag("002"));

    wait_until("first receipt", || printer.count() == 1);
    thread::sleep(Duration::from_millis(100));
    assert!(handle.inject_tag("003"));
    wait_until("second receipt", || printer.count() == 2);

    handle.request_shutdown();
    let (summary, sink) = run.join().unwrap();

    assert_eq!(printer.peak.load(Ordering::SeqCst), 1);
    assert_eq!(summary.pipelines_started, 2);
    assert!(sink.events.contains(&AppEvent::PipelineFailed {
        pipeline: PipelineId(1),
        fault: PipelineFault::PrintTimeout,
    }));
    assert!(sink.events.contains(&AppEvent::TriggerDropped {
        tag: tag_code("002").unwrap(),
        reason: DropReason::PrinterBusy,
    }));
    assert!(sink.events.contains(&AppEvent::StaleOutcome {
        pipeline: PipelineId(1)
    }));
}

#[test]
fn notices_are_printed_when_enabled() {
    let mut config = fast_config();
    config.printer.notices = true;
    let device = Arc::new(SimulatedDeviceLink::new(&config.sim));
    let printer = RecordingPrinter::default();
    let backends = Backends {
        link: device.clone(),
        generator: Arc::new(
            CannedGenerator::with_texts(vec!["A fortune".into()])
                .with_delay(Duration::from_millis(100)),
        ),
        printer: Arc::new(printer.clone()),
        themes: ThemeTable::default(),
    };

    let runtime = Runtime::start(&config, backends).unwrap();
    let handle = runtime.handle();
    let run = spawn_run(runtime);

    wait_until("startup notice", || printer.notices() == vec![Notice::Online]);
    assert!(handle.inject_tag("001"));
    wait_until("receipt", || printer.count() == 1);

    handle.request_shutdown();
    run.join().unwrap();
    assert_eq!(printer.notices(), vec![Notice::Online, Notice::Consulting]);
}
