//! System configuration parameters
//!
//! All tunable parameters for the Divinofax kiosk.  Loaded from a JSON file
//! through [`ConfigPort`](crate::app::ports::ConfigPort); every section falls
//! back to its defaults when absent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Baud rates the controller firmware and printers are known to accept.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Core system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub system: GeneralConfig,
    pub simulation: SimulationFlags,
    pub link: LinkConfig,
    pub pipeline: PipelineConfig,
    pub lights: LightConfig,
    pub rfid: RfidConfig,
    pub generation: GenerationConfig,
    pub printer: PrinterConfig,
    pub themes: ThemeConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Force every component into simulation.
    pub simulation_mode: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            simulation_mode: false,
        }
    }
}

/// Per-component real/simulated selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationFlags {
    pub device: bool,
    pub generation: bool,
    pub printer: bool,
}

/// Device link: serial port, per-command timeout, heartbeat and reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baudrate: u32,
    /// Per-command response deadline.
    pub command_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Deadline for one heartbeat `get_status`.
    pub heartbeat_timeout_ms: u64,
    /// Consecutive heartbeat misses before the session is declared degraded.
    pub miss_threshold: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Reconnect attempts before the link gives up and becomes a no-op sink.
    pub reconnect_attempts: u32,
    /// Wait after opening the port; the controller resets on open.
    pub settle_delay_ms: u64,
    /// Serial read timeout; bounds how quickly the reader notices shutdown.
    pub read_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baudrate: 115_200,
            command_timeout_ms: 2_000,
            heartbeat_interval_ms: 2_000,
            heartbeat_timeout_ms: 2_000,
            miss_threshold: 3,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 8_000,
            reconnect_attempts: 5,
            settle_delay_ms: 2_000,
            read_timeout_ms: 50,
        }
    }
}

impl LinkConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Pipeline state machine timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Same-tag repeat suppression window.
    pub debounce_window_ms: u64,
    /// Confirmation window armed on entering `Debouncing`.
    pub confirm_window_ms: u64,
    /// When set, an unconfirmed detection returns to `Idle`.
    pub require_confirmation: bool,
    pub generation_timeout_ms: u64,
    pub print_timeout_ms: u64,
    /// How long the `Error` state holds before returning to `Idle`.
    pub error_display_ms: u64,
    /// Control loop tick; bounds how late a deadline can be noticed.
    pub tick_interval_ms: u64,
    /// Theme used when a tag has no mapping.
    pub default_theme: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 2_000,
            confirm_window_ms: 250,
            require_confirmation: false,
            generation_timeout_ms: 30_000,
            print_timeout_ms: 15_000,
            error_display_ms: 3_000,
            tick_interval_ms: 100,
            default_theme: "generic".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub enabled: bool,
    /// Play the colour sweep once the link is up.
    pub startup_sequence: bool,
    /// Deadline for one best-effort `set_light`.
    pub command_timeout_ms: u64,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_sequence: true,
            command_timeout_ms: 500,
        }
    }
}

/// Detection source.  `None` relies on pushed `rfid_detected` events;
/// `Some(ms)` additionally polls with `read_rfid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    pub poll_interval_ms: Option<u64>,
}

/// External text generator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            program: "divinofax-generate".into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub port: String,
    pub baudrate: u32,
    /// Blank lines fed after each receipt.
    pub feed_lines: u8,
    /// Query the paper sensor before printing.
    pub paper_check: bool,
    /// Simulated printer output; stdout when unset.
    pub output_file: Option<String>,
    /// Print the startup, "consulting" and "unclear" notice receipts.
    pub notices: bool,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".into(),
            baudrate: 9_600,
            feed_lines: 3,
            paper_check: true,
            output_file: Some("thermal_output.txt".into()),
            notices: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// JSON object mapping tag codes to theme names.
    pub mappings_file: Option<String>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            mappings_file: Some("data/rfid_mappings.json".into()),
        }
    }
}

/// Simulated device: tags pushed in order, one per interval, cycling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub tags: Vec<String>,
    pub tag_interval_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tags: vec![
                "123456789012".into(),
                "987654321098".into(),
                "111222333444".into(),
                "555666777888".into(),
            ],
            tag_interval_ms: 8_000,
        }
    }
}

impl SystemConfig {
    /// Effective simulation selection after the global override.
    pub fn effective_simulation(&self) -> SimulationFlags {
        if self.system.simulation_mode {
            SimulationFlags {
                device: true,
                generation: true,
                printer: true,
            }
        } else {
            self.simulation
        }
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), &'static str> {
        let link = &self.link;
        if link.command_timeout_ms == 0 {
            return Err("link.command_timeout_ms must be > 0");
        }
        if link.heartbeat_interval_ms == 0 || link.heartbeat_timeout_ms == 0 {
            return Err("link heartbeat interval and timeout must be > 0");
        }
        if link.miss_threshold == 0 {
            return Err("link.miss_threshold must be >= 1");
        }
        if link.backoff_initial_ms == 0 || link.backoff_initial_ms > link.backoff_max_ms {
            return Err("link backoff must satisfy 0 < initial <= max");
        }
        if !SUPPORTED_BAUD_RATES.contains(&link.baudrate) {
            return Err("link.baudrate unsupported");
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.printer.baudrate) {
            return Err("printer.baudrate unsupported");
        }

        let p = &self.pipeline;
        if p.generation_timeout_ms == 0 || p.print_timeout_ms == 0 {
            return Err("pipeline generation and print timeouts must be > 0");
        }
        if p.tick_interval_ms == 0 {
            return Err("pipeline.tick_interval_ms must be > 0");
        }
        if p.default_theme.trim().is_empty() {
            return Err("pipeline.default_theme must not be empty");
        }
        if self.rfid.poll_interval_ms == Some(0) {
            return Err("rfid.poll_interval_ms must be > 0 when set");
        }

        let sim = self.effective_simulation();
        if sim.device && self.sim.tags.is_empty() {
            return Err("sim.tags must not be empty in device simulation");
        }
        if sim.device && self.sim.tag_interval_ms == 0 {
            return Err("sim.tag_interval_ms must be > 0");
        }
        if !sim.generation && self.generation.program.trim().is_empty() {
            return Err("generation.program must be set");
        }
        Ok(())
    }
}
