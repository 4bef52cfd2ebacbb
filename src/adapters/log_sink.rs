//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (stderr via `env_logger` in production).  One line per
//! event, prefixed with a fixed category tag so the kiosk log can be
//! grepped.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started(state) => {
                info!("START | initial_state={:?}", state);
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::TriggerAccepted {
                pipeline,
                tag,
                theme,
            } => {
                info!("PIPELINE | {} accepted | tag={} theme={}", pipeline, tag, theme);
            }
            AppEvent::TriggerDropped { tag, reason } => {
                info!("TRIGGER | dropped | tag={} reason={}", tag, reason.as_str());
            }
            AppEvent::PipelineCompleted { pipeline, tag } => {
                info!("PIPELINE | {} completed | tag={}", pipeline, tag);
            }
            AppEvent::PipelineFailed { pipeline, fault } => {
                warn!("PIPELINE | {} failed | fault={}", pipeline, fault);
            }
            AppEvent::PipelineAbandoned { pipeline, reason } => {
                info!("PIPELINE | {} abandoned | reason={}", pipeline, reason);
            }
            AppEvent::StaleOutcome { pipeline } => {
                info!("PIPELINE | {} late outcome discarded", pipeline);
            }
            AppEvent::ShutdownRequested => {
                info!("SHUTDOWN | requested");
            }
            AppEvent::Stopped => {
                info!("SHUTDOWN | orchestrator stopped");
            }
        }
    }
}
