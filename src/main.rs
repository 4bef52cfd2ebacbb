//! Divinofax kiosk: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SerialDeviceLink   ProcessGenerator   SerialPrinter           │
//! │  (DeviceLink)       (Generation)       (Print)                 │
//! │  JsonConfigFile     LogEventSink       ThemeTable              │
//! │  (Config)           (EventSink)        (ThemeResolver)         │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            FortuneService (pure logic)                 │    │
//! │  │  FSM · Debouncer · LED feedback                        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Runtime: inbox · helper threads · block_on control loop       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};

use divinofax::adapters::config_file::JsonConfigFile;
use divinofax::app::ports::ConfigPort;
use divinofax::runtime::{Backends, Runtime};

#[derive(Debug, Parser)]
#[command(name = "divinofax", version, about = "Fortune kiosk orchestration engine")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config/divinofax.json")]
    config: PathBuf,

    /// Simulate the device, generator and printer.
    #[arg(long)]
    simulate: bool,

    /// Log level (overrides the config file; RUST_LOG overrides both).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── 1. Configuration ──────────────────────────────────────
    let store = JsonConfigFile::new(&cli.config);
    let mut config = store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))?;
    if cli.simulate {
        config.system.simulation_mode = true;
    }

    // ── 2. Logging ────────────────────────────────────────────
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.system.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    info!(
        "divinofax {} (config {}, simulation {})",
        env!("CARGO_PKG_VERSION"),
        store.path().display(),
        config.system.simulation_mode
    );

    // ── 3. Backends + runtime ─────────────────────────────────
    let backends = Backends::from_config(&config)?;
    let runtime = Runtime::start(&config, backends)?;

    // ── 4. Signals ────────────────────────────────────────────
    let flag = runtime.shutdown_flag();
    signal_hook::flag::register(SIGINT, flag.clone()).context("registering SIGINT")?;
    signal_hook::flag::register(SIGTERM, flag).context("registering SIGTERM")?;

    // ── 5. Control loop ───────────────────────────────────────
    let summary = runtime.run()?;
    info!(
        "Shutdown complete: {} pipeline(s), final state {:?}",
        summary.pipelines_started, summary.final_state
    );
    Ok(())
}
