//! Simulated backends for running without the controller, the generator,
//! or the printer.
//!
//! Each satisfies the same port contract as its real counterpart and is
//! chosen once, at construction, by [`crate::runtime::Backends`].

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use log::{debug, info};
use serde_json::{Value, json};

use crate::app::pipeline::{Notice, PipelineResult};
use crate::app::ports::{CancelToken, DeviceLink, GenerationAdapter, GenerationRequest, PrintAdapter};
use crate::config::{PrinterConfig, SimConfig};
use crate::drivers::light::{Color, LightCommand};
use crate::error::{GenerationError, PrintError, TransportError};
use crate::link::protocol::{CommandName, DeviceInfo, PushEvent, Request, Response};
use crate::link::{LinkState, LinkStatus, PushEvents, lock, sleep_while};

pub const SIM_FIRMWARE_VERSION: &str = "sim-1.0";

// ---------------------------------------------------------------------------
// Device link
// ---------------------------------------------------------------------------

/// Pushes a fixed tag list, one tag per interval, cycling.  Lights are
/// recorded instead of shown.
pub struct SimulatedDeviceLink {
    tags: Vec<String>,
    interval: Duration,
    cursor: AtomicUsize,
    replies: AtomicU64,
    lights: Mutex<Vec<LightCommand>>,
    subscribers: Mutex<Vec<Sender<PushEvent>>>,
}

impl SimulatedDeviceLink {
    pub fn new(config: &SimConfig) -> Self {
        info!(
            "link(sim): {} tag(s), one every {} ms",
            config.tags.len(),
            config.tag_interval_ms
        );
        Self {
            tags: config.tags.clone(),
            interval: Duration::from_millis(config.tag_interval_ms),
            cursor: AtomicUsize::new(0),
            replies: AtomicU64::new(0),
            lights: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Every light command received, oldest first.
    pub fn lights(&self) -> Vec<LightCommand> {
        lock(&self.lights).clone()
    }

    /// Push a detection right now, outside the schedule.
    pub fn inject(&self, tag: &str) {
        let event = PushEvent::rfid_detected(tag);
        lock(&self.subscribers).retain(|s| s.send(event.clone()).is_ok());
    }

    fn next_tag(&self) -> Option<&str> {
        if self.tags.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(&self.tags[n % self.tags.len()])
    }

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            firmware_version: SIM_FIRMWARE_VERSION.into(),
            rfid_enabled: true,
            lights_enabled: true,
        }
    }
}

impl DeviceLink for SimulatedDeviceLink {
    fn send(&self, request: Request, _timeout: Duration) -> Result<Response, TransportError> {
        let id = self.replies.fetch_add(1, Ordering::Relaxed) + 1;
        let result = match request.command {
            CommandName::GetStatus => {
                serde_json::to_value(Self::device_info()).unwrap_or(Value::Null)
            }
            CommandName::SetLight => {
                let color = request
                    .params
                    .get("color")
                    .and_then(|v| serde_json::from_value::<Color>(v.clone()).ok())
                    .unwrap_or(Color::Off);
                let brightness = request
                    .params
                    .get("brightness")
                    .and_then(Value::as_u64)
                    .map_or(0, |b| b.min(100) as u8);
                debug!("link(sim): light {} @ {}", color, brightness);
                lock(&self.lights).push(LightCommand::new(color, brightness));
                Value::Null
            }
            CommandName::ReadRfid => json!({ "rfid": self.next_tag() }),
        };
        Ok(Response::ok(id, result))
    }

    fn subscribe(&self) -> PushEvents {
        let (tx, rx) = channel::unbounded();
        lock(&self.subscribers).push(tx);
        PushEvents::new(rx)
    }

    /// Drives the tag schedule in place of a heartbeat.
    fn run_heartbeat(&self, running: &AtomicBool) {
        while sleep_while(self.interval, running) {
            if let Some(tag) = self.next_tag() {
                info!("link(sim): presenting tag {}", tag);
                let event = PushEvent::rfid_detected(tag);
                lock(&self.subscribers).retain(|s| s.send(event.clone()).is_ok());
            }
        }
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: LinkState::Connected,
            consecutive_misses: 0,
            device: Some(Self::device_info()),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

pub const SAMPLE_FORTUNES: [&str; 5] = [
    "Stars whisper secrets\nCosmic winds carry your dreams\nDestiny awaits",
    "Ancient trees hold truth\nRoots deep in earth's sacred soil\nWisdom grows within",
    "Rivers of time flow\nPast and future merge as one\nPresent moment shines",
    "Fire transforms all\nBurning away old patterns\nPhoenix soul rises",
    "Mountain peaks reach high\nTouching clouds of possibility\nSummit calls to you",
];

/// Returns canned texts in rotation.
pub struct CannedGenerator {
    texts: Vec<String>,
    next: AtomicUsize,
    delay: Duration,
}

impl Default for CannedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CannedGenerator {
    pub fn new() -> Self {
        Self::with_texts(SAMPLE_FORTUNES.iter().map(|s| (*s).to_owned()).collect())
    }

    pub fn with_texts(texts: Vec<String>) -> Self {
        Self {
            texts,
            next: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Pretend each call takes `delay`.  Deadline and cancel are honoured
    /// while waiting.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl GenerationAdapter for CannedGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<String, GenerationError> {
        let ready_at = Instant::now() + self.delay;
        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            let now = Instant::now();
            if now >= ready_at {
                break;
            }
            if now >= request.deadline {
                return Err(GenerationError::Timeout);
            }
            std::thread::sleep((ready_at - now).min(Duration::from_millis(10)));
        }

        if self.texts.is_empty() {
            return Err(GenerationError::BackendFailure("no canned texts".into()));
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let text = self.texts[n % self.texts.len()].clone();
        debug!(
            "generation(sim): theme '{}' for tag {}",
            request.theme, request.tag
        );
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

/// Writes each receipt as a plain-text block.
pub struct SinkPrinter<W: Write + Send> {
    sink: Mutex<W>,
}

impl<W: Write + Send> SinkPrinter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SinkPrinter<Box<dyn Write + Send>> {
    /// Append to `printer.output_file`, or write to stdout when unset.
    pub fn from_config(config: &PrinterConfig) -> io::Result<Self> {
        let sink: Box<dyn Write + Send> = match &config.output_file {
            Some(path) => {
                info!("printer(sim): appending receipts to {}", path);
                Box::new(OpenOptions::new().create(true).append(true).open(path)?)
            }
            None => Box::new(io::stdout()),
        };
        Ok(Self::new(sink))
    }
}

impl<W: Write + Send> PrintAdapter for SinkPrinter<W> {
    fn print(&self, document: &PipelineResult) -> Result<(), PrintError> {
        let mut sink = lock(&self.sink);
        writeln!(sink, "--- fortune {} ({}) ---", document.tag, document.theme)?;
        for line in &document.text_lines {
            writeln!(sink, "{}", line)?;
        }
        writeln!(sink)?;
        sink.flush()?;
        info!(
            "printer(sim): printed {} line(s) for tag {}",
            document.text_lines.len(),
            document.tag
        );
        Ok(())
    }

    fn print_notice(&self, notice: Notice) -> Result<(), PrintError> {
        let mut sink = lock(&self.sink);
        writeln!(sink, "--- notice ({}) ---", notice)?;
        for line in notice.lines() {
            writeln!(sink, "{}", line)?;
        }
        writeln!(sink)?;
        sink.flush()?;
        info!("printer(sim): printed {} notice", notice);
        Ok(())
    }
}
