//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ FortuneService (domain)
//! ```
//!
//! Two kinds of port live here:
//!
//! - **Loop ports** (`LightPort`, `WorkerPort`, `ThemeResolver`, `EventSink`)
//!   are called by the service from the control loop.  They must return
//!   immediately; anything slow is handed to a worker.
//! - **Capability ports** (`DeviceLink`, `GenerationAdapter`, `PrintAdapter`)
//!   are the blocking backends.  Each has a real and a simulated
//!   implementation, chosen once at construction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::app::events::AppEvent;
use crate::app::pipeline::{
    GenerationJob, Notice, PipelineId, PipelineResult, PrintJob, TagCode, Theme,
};
use crate::config::SystemConfig;
use crate::drivers::light::LightCommand;
use crate::error::{GenerationError, PrintError, TransportError};
use crate::link::protocol::{Request, Response};
use crate::link::{LinkStatus, PushEvents};

// ───────────────────────────────────────────────────────────────
// Light port (domain → status light)
// ───────────────────────────────────────────────────────────────

/// Best-effort status light.  Never blocks, never reports failure.
pub trait LightPort {
    fn set_light(&mut self, command: LightCommand);
}

// ───────────────────────────────────────────────────────────────
// Worker port (domain → generation / print workers)
// ───────────────────────────────────────────────────────────────

/// Starts slow work off the control loop.  Outcomes come back later as
/// [`AppCommand`](super::commands::AppCommand)s tagged with the pipeline id.
pub trait WorkerPort {
    fn start_generation(&mut self, job: GenerationJob);

    /// Abandon a running generation.  Its outcome, if any, is never delivered.
    fn cancel_generation(&mut self, pipeline: PipelineId);

    /// At most one print call runs at a time.
    fn start_print(&mut self, job: PrintJob);

    /// Best effort: no outcome is reported, and the notice is skipped when
    /// the printer is busy or notices are disabled.
    fn print_notice(&mut self, notice: Notice);
}

// ───────────────────────────────────────────────────────────────
// Theme lookup
// ───────────────────────────────────────────────────────────────

/// Tag code → theme.  `None` means "use the default theme".
pub trait ThemeResolver {
    fn resolve(&self, tag: &TagCode) -> Option<Theme>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds.  Shared by every producer so event timestamps
/// and the loop's deadlines use the same timeline.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Device link (capability)
// ───────────────────────────────────────────────────────────────

/// Request/response plus push-notification channel to the peripheral
/// controller.
///
/// Implementations own the transport handle exclusively and serialise
/// writes.  Every method is callable from any thread.
pub trait DeviceLink: Send + Sync {
    /// Send one command and wait up to `timeout` for its response.
    /// Never retries internally.
    fn send(&self, request: Request, timeout: Duration) -> Result<Response, TransportError>;

    /// Unbounded stream of push events.  Ends when the link gives up.
    fn subscribe(&self) -> PushEvents;

    /// Heartbeat and reconnect loop.  Blocks until `running` is cleared or
    /// the link degrades permanently.
    fn run_heartbeat(&self, running: &AtomicBool);

    fn status(&self) -> LinkStatus;
}

// ───────────────────────────────────────────────────────────────
// Generation adapter (capability)
// ───────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between the loop and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub theme: Theme,
    pub tag: TagCode,
    /// Hard deadline.  The adapter returns [`GenerationError::Timeout`]
    /// rather than run past it.
    pub deadline: Instant,
}

pub trait GenerationAdapter: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<String, GenerationError>;
}

// ───────────────────────────────────────────────────────────────
// Print adapter (capability)
// ───────────────────────────────────────────────────────────────

pub trait PrintAdapter: Send + Sync {
    fn print(&self, document: &PipelineResult) -> Result<(), PrintError>;

    fn print_notice(&self, notice: Notice) -> Result<(), PrintError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`SystemConfig::default()`] if no stored
    /// config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed to deserialise.
    Corrupted(String),
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError(std::io::Error),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted(detail) => write!(f, "config corrupted: {}", detail),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
