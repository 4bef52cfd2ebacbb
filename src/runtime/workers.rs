//! Loop-side port implementations.
//!
//! [`Peripherals`] is what the control loop hands to the service.  Every
//! call returns immediately: lights go to a dispatcher thread, generation
//! and printing run on their own worker threads and report back through
//! the inbox.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use log::{debug, warn};

use super::inbox::Inbox;
use crate::adapters::themes::ThemeTable;
use crate::app::commands::AppCommand;
use crate::app::pipeline::{GenerationJob, Notice, PipelineId, PrintJob, TagCode, Theme};
use crate::app::ports::{
    CancelToken, DeviceLink, GenerationAdapter, GenerationRequest, LightPort, PrintAdapter,
    ThemeResolver, WorkerPort,
};
use crate::drivers::light::{LightCommand, STARTUP_SEQUENCE, STARTUP_STEP_MS};
use crate::error::{GenerationError, PrintError};
use crate::link::protocol::Request;
use crate::link::{lock, sleep_while};

/// Pending light commands.  Small: only the latest state matters.
pub const LIGHT_QUEUE_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Light dispatcher
// ---------------------------------------------------------------------------

/// Sends queued light commands one by one.  Failures are logged and
/// forgotten.  Returns once every sender is dropped.
pub fn run_light_dispatcher(
    link: &dyn DeviceLink,
    queue: &Receiver<LightCommand>,
    timeout: Duration,
    startup_sequence: bool,
    running: &AtomicBool,
) {
    let send = |command: LightCommand| {
        if let Err(e) = link.send(Request::set_light(command), timeout) {
            debug!("light {} @ {} not delivered: {}", command.color, command.brightness, e);
        }
    };

    if startup_sequence {
        for step in STARTUP_SEQUENCE {
            send(step);
            if !sleep_while(Duration::from_millis(STARTUP_STEP_MS), running) {
                break;
            }
        }
    }

    for command in queue {
        send(command);
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// One thread per job.  At most one pipeline is live, so at most one
/// generation runs at a time.  Print calls, receipts and notices alike,
/// take the print lane for their whole duration.
pub struct WorkerPool {
    generator: Arc<dyn GenerationAdapter>,
    printer: Arc<dyn PrintAdapter>,
    inbox: Arc<Inbox>,
    running: HashMap<PipelineId, CancelToken>,
    print_lane: Arc<Mutex<()>>,
    notices: bool,
}

impl WorkerPool {
    pub fn new(
        generator: Arc<dyn GenerationAdapter>,
        printer: Arc<dyn PrintAdapter>,
        inbox: Arc<Inbox>,
    ) -> Self {
        Self {
            generator,
            printer,
            inbox,
            running: HashMap::new(),
            print_lane: Arc::new(Mutex::new(())),
            notices: false,
        }
    }

    /// Enable the notice receipts (`printer.notices`).
    pub fn with_notices(mut self, enabled: bool) -> Self {
        self.notices = enabled;
        self
    }
}

impl WorkerPort for WorkerPool {
    fn start_generation(&mut self, job: GenerationJob) {
        let token = CancelToken::new();
        self.running.clear();
        self.running.insert(job.pipeline, token.clone());

        let generator = Arc::clone(&self.generator);
        let inbox = Arc::clone(&self.inbox);
        let pipeline = job.pipeline;
        let request = GenerationRequest {
            theme: job.theme,
            tag: job.tag,
            deadline: Instant::now() + job.budget,
        };
        let spawned = thread::Builder::new()
            .name(format!("generate-{}", pipeline.0))
            .spawn(move || {
                let result = generator.generate(&request, &token);
                if token.is_cancelled() {
                    debug!("generation for {} cancelled; outcome dropped", pipeline);
                    return;
                }
                inbox.post(AppCommand::GenerationFinished { pipeline, result });
            });
        if let Err(e) = spawned {
            warn!("cannot start generation worker: {}", e);
            self.inbox.post(AppCommand::GenerationFinished {
                pipeline,
                result: Err(GenerationError::BackendFailure(format!("worker spawn: {}", e))),
            });
        }
    }

    fn cancel_generation(&mut self, pipeline: PipelineId) {
        if let Some(token) = self.running.remove(&pipeline) {
            token.cancel();
        }
    }

    fn start_print(&mut self, job: PrintJob) {
        let printer = Arc::clone(&self.printer);
        let inbox = Arc::clone(&self.inbox);
        let lane = Arc::clone(&self.print_lane);
        let pipeline = job.pipeline;
        let spawned = thread::Builder::new()
            .name(format!("print-{}", pipeline.0))
            .spawn(move || {
                let result = {
                    let _lane = lock(&lane);
                    printer.print(&job.document)
                };
                inbox.post(AppCommand::PrintFinished { pipeline, result });
            });
        if let Err(e) = spawned {
            warn!("cannot start print worker: {}", e);
            self.inbox.post(AppCommand::PrintFinished {
                pipeline,
                result: Err(PrintError::fault(format!("worker spawn: {}", e))),
            });
        }
    }

    fn print_notice(&mut self, notice: Notice) {
        if !self.notices {
            return;
        }
        let printer = Arc::clone(&self.printer);
        let lane = Arc::clone(&self.print_lane);
        let spawned = thread::Builder::new()
            .name(format!("notice-{}", notice))
            .spawn(move || {
                let _lane = match lane.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => {
                        debug!("printer busy; {} notice skipped", notice);
                        return;
                    }
                };
                if let Err(e) = printer.print_notice(notice) {
                    warn!("{} notice not printed: {}", notice, e);
                }
            });
        if let Err(e) = spawned {
            warn!("cannot start notice worker: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Peripherals
// ---------------------------------------------------------------------------

pub struct Peripherals {
    /// `None` when lights are disabled.
    lights: Option<Sender<LightCommand>>,
    workers: WorkerPool,
    themes: ThemeTable,
}

impl Peripherals {
    pub fn new(lights: Option<Sender<LightCommand>>, workers: WorkerPool, themes: ThemeTable) -> Self {
        Self {
            lights,
            workers,
            themes,
        }
    }
}

impl LightPort for Peripherals {
    fn set_light(&mut self, command: LightCommand) {
        let Some(queue) = &self.lights else {
            return;
        };
        match queue.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("light queue full; dropping {}", command.color),
            Err(TrySendError::Disconnected(_)) => {
                debug!("light dispatcher gone");
                self.lights = None;
            }
        }
    }
}

impl WorkerPort for Peripherals {
    fn start_generation(&mut self, job: GenerationJob) {
        self.workers.start_generation(job);
    }

    fn cancel_generation(&mut self, pipeline: PipelineId) {
        self.workers.cancel_generation(pipeline);
    }

    fn start_print(&mut self, job: PrintJob) {
        self.workers.start_print(job);
    }

    fn print_notice(&mut self, notice: Notice) {
        self.workers.print_notice(notice);
    }
}

impl ThemeResolver for Peripherals {
    fn resolve(&self, tag: &TagCode) -> Option<Theme> {
        self.themes.resolve(tag)
    }
}
