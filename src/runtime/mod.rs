//! Process runtime: backend selection, helper threads, and the control loop.
//!
//! ```text
//!              ┌─────────── helper threads ───────────┐
//!              │ heartbeat  push-pump  poller  ticker │
//!              │ light dispatcher   generation/print  │
//!              └──────────────────┬───────────────────┘
//!                                 │ Inbox (embassy-sync Channel)
//!                                 ▼
//!            block_on(control_loop) ── FortuneService ── Peripherals
//! ```
//!
//! The control loop is the only owner of the orchestrator.  It never
//! blocks on I/O: everything slow lives on a helper thread.

pub mod inbox;
pub mod workers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, info, warn};

use crate::adapters::generation::ProcessGenerator;
use crate::adapters::log_sink::LogEventSink;
use crate::adapters::printer::SerialPrinter;
use crate::adapters::themes::ThemeTable;
use crate::adapters::time::MonotonicClock;
use crate::app::commands::AppCommand;
use crate::app::pipeline::{TriggerEvent, tag_code};
use crate::app::ports::{Clock, DeviceLink, EventSink, GenerationAdapter, PrintAdapter};
use crate::app::service::FortuneService;
use crate::config::SystemConfig;
use crate::fsm::OrchestratorState;
use crate::link::client::SerialDeviceLink;
use crate::link::protocol::{Request, trigger_from_push, trigger_from_read};
use crate::link::serial::SerialConnector;
use crate::link::sleep_while;
use crate::sim::{CannedGenerator, SimulatedDeviceLink, SinkPrinter};

use inbox::{Inbox, LoopEvent};
use workers::{LIGHT_QUEUE_DEPTH, Peripherals, WorkerPool, run_light_dispatcher};

/// How often blocking helper loops re-check the `running` flag.
const HELPER_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// The three capabilities plus the theme table, each real or simulated.
pub struct Backends {
    pub link: Arc<dyn DeviceLink>,
    pub generator: Arc<dyn GenerationAdapter>,
    pub printer: Arc<dyn PrintAdapter>,
    pub themes: ThemeTable,
}

impl Backends {
    /// Pick real or simulated implementations once, from the config.
    pub fn from_config(config: &SystemConfig) -> anyhow::Result<Self> {
        let sim = config.effective_simulation();

        let link: Arc<dyn DeviceLink> = if sim.device {
            Arc::new(SimulatedDeviceLink::new(&config.sim))
        } else {
            Arc::new(SerialDeviceLink::open(
                SerialConnector::from_config(&config.link),
                config.link.clone(),
            ))
        };

        let generator: Arc<dyn GenerationAdapter> = if sim.generation {
            Arc::new(CannedGenerator::new())
        } else {
            Arc::new(ProcessGenerator::from_config(&config.generation))
        };

        let printer: Arc<dyn PrintAdapter> = if sim.printer {
            Arc::new(
                SinkPrinter::from_config(&config.printer)
                    .context("opening simulated printer output")?,
            )
        } else {
            Arc::new(SerialPrinter::new(config.printer.clone()))
        };

        let themes = match &config.themes.mappings_file {
            Some(path) => ThemeTable::load(path)?,
            None => ThemeTable::default(),
        };

        info!(
            "Backends: device={} generation={} printer={} themes={}",
            if sim.device { "sim" } else { "serial" },
            if sim.generation { "sim" } else { "process" },
            if sim.printer { "sim" } else { "serial" },
            themes.len()
        );

        Ok(Self {
            link,
            generator,
            printer,
            themes,
        })
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Cheap handle for other threads: request shutdown, inject detections.
#[derive(Clone)]
pub struct RuntimeHandle {
    inbox: Arc<Inbox>,
    shutdown: Arc<AtomicBool>,
    clock: Arc<MonotonicClock>,
}

impl RuntimeHandle {
    /// Same effect as SIGINT: the ticker turns it into a `Shutdown` command.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Deliver a detection as if the device had pushed it.
    pub fn inject_tag(&self, tag: &str) -> bool {
        match tag_code(tag) {
            Ok(tag) => self.inbox.post(AppCommand::Trigger(TriggerEvent::new(
                tag,
                self.clock.now_ms(),
            ))),
            Err(e) => {
                warn!("inject: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub pipelines_started: u32,
    pub final_state: OrchestratorState,
}

pub struct Runtime {
    service: FortuneService,
    peripherals: Peripherals,
    clock: Arc<MonotonicClock>,
    inbox: Arc<Inbox>,
    /// Cleared once the control loop exits; helper threads watch it.
    running: Arc<AtomicBool>,
    /// Set by signal handlers or a [`RuntimeHandle`].
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

fn spawn_named(
    threads: &mut Vec<JoinHandle<()>>,
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> anyhow::Result<()> {
    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(body)
        .with_context(|| format!("spawning {} thread", name))?;
    threads.push(handle);
    Ok(())
}

impl Runtime {
    /// Start every helper thread and the orchestrator.  Returns once the
    /// service is in `Idle`; call [`run`](Self::run) to process events.
    pub fn start(config: &SystemConfig, backends: Backends) -> anyhow::Result<Self> {
        let Backends {
            link,
            generator,
            printer,
            themes,
        } = backends;

        let clock = Arc::new(MonotonicClock::new());
        let inbox = Arc::new(Inbox::new());
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::new();

        // Light dispatcher.
        let lights = if config.lights.enabled {
            let (tx, rx) = channel::bounded(LIGHT_QUEUE_DEPTH);
            let link = Arc::clone(&link);
            let running = Arc::clone(&running);
            let timeout = Duration::from_millis(config.lights.command_timeout_ms);
            let startup = config.lights.startup_sequence;
            spawn_named(&mut threads, "lights", move || {
                run_light_dispatcher(link.as_ref(), &rx, timeout, startup, &running);
            })?;
            Some(tx)
        } else {
            None
        };

        // Heartbeat / reconnect (or the simulated tag schedule).
        {
            let link = Arc::clone(&link);
            let running = Arc::clone(&running);
            spawn_named(&mut threads, "heartbeat", move || {
                link.run_heartbeat(&running);
                debug!("heartbeat thread exiting");
            })?;
        }

        // Push events → triggers.
        {
            let events = link.subscribe();
            let inbox = Arc::clone(&inbox);
            let clock = Arc::clone(&clock);
            let running = Arc::clone(&running);
            spawn_named(&mut threads, "push-pump", move || {
                while running.load(Ordering::Acquire) {
                    match events.recv_timeout(HELPER_POLL) {
                        Ok(event) => match trigger_from_push(&event, clock.now_ms()) {
                            Ok(Some(trigger)) => {
                                inbox.post(AppCommand::Trigger(trigger));
                            }
                            Ok(None) => debug!("ignoring push event '{}'", event.event),
                            Err(e) => warn!("bad detection event: {}", e),
                        },
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            info!("push event stream ended");
                            break;
                        }
                    }
                }
            })?;
        }

        // Optional read_rfid polling.
        if let Some(interval_ms) = config.rfid.poll_interval_ms {
            let link = Arc::clone(&link);
            let inbox = Arc::clone(&inbox);
            let clock = Arc::clone(&clock);
            let running = Arc::clone(&running);
            let timeout = config.link.command_timeout();
            spawn_named(&mut threads, "rfid-poll", move || {
                while sleep_while(Duration::from_millis(interval_ms), &running) {
                    match link.send(Request::read_rfid(), timeout) {
                        Ok(response) => match trigger_from_read(&response, clock.now_ms()) {
                            Ok(Some(trigger)) => {
                                inbox.post(AppCommand::Trigger(trigger));
                            }
                            Ok(None) => {}
                            Err(e) => warn!("bad read_rfid result: {}", e),
                        },
                        Err(e) => debug!("read_rfid failed: {}", e),
                    }
                }
            })?;
        }

        // Ticker; also turns the shutdown flag into one Shutdown command.
        {
            let inbox = Arc::clone(&inbox);
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            let tick = Duration::from_millis(config.pipeline.tick_interval_ms);
            spawn_named(&mut threads, "ticker", move || {
                let mut shutdown_posted = false;
                while sleep_while(tick, &running) {
                    if !shutdown_posted && shutdown.load(Ordering::Acquire) {
                        shutdown_posted = inbox.post(AppCommand::Shutdown);
                    }
                    inbox.post_tick();
                }
            })?;
        }

        let workers = WorkerPool::new(generator, printer, Arc::clone(&inbox))
            .with_notices(config.printer.notices);
        let peripherals = Peripherals::new(lights, workers, themes);

        Ok(Self {
            service: FortuneService::new(config.pipeline.clone()),
            peripherals,
            clock,
            inbox,
            running,
            shutdown,
            threads,
        })
    }

    /// Flag for `signal_hook::flag::register`.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inbox: Arc::clone(&self.inbox),
            shutdown: Arc::clone(&self.shutdown),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Run until shutdown completes, logging events.
    pub fn run(self) -> anyhow::Result<RunSummary> {
        self.run_with_sink(&mut LogEventSink::new())
    }

    /// Run until shutdown completes, then stop and join helper threads.
    pub fn run_with_sink(mut self, sink: &mut impl EventSink) -> anyhow::Result<RunSummary> {
        self.service
            .start(self.clock.now_ms(), &mut self.peripherals, sink);
        info!("Runtime ready. Entering control loop.");

        futures_lite::future::block_on(control_loop(
            &mut self.service,
            &self.inbox,
            self.clock.as_ref(),
            &mut self.peripherals,
            sink,
        ));

        let summary = RunSummary {
            pipelines_started: self.service.pipelines_started(),
            final_state: self.service.state(),
        };

        self.running.store(false, Ordering::Release);
        // Dropping the peripherals closes the light queue.
        let Self {
            peripherals,
            threads,
            ..
        } = self;
        drop(peripherals);
        for handle in threads {
            let name = handle.thread().name().unwrap_or("helper").to_owned();
            if handle.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
        info!(
            "Runtime stopped after {} pipeline(s)",
            summary.pipelines_started
        );
        Ok(summary)
    }
}

/// Single consumer of the inbox.  Exits once the service reports stopped.
async fn control_loop(
    service: &mut FortuneService,
    inbox: &Inbox,
    clock: &dyn Clock,
    hw: &mut Peripherals,
    sink: &mut impl EventSink,
) {
    while !service.is_stopped() {
        let event = inbox.next().await;
        let now_ms = clock.now_ms();
        match event {
            LoopEvent::Tick => service.tick(now_ms, hw, sink),
            LoopEvent::Command(command) => service.handle_command(command, now_ms, hw, sink),
        }
    }
}
