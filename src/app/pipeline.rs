//! Pipeline domain types.
//!
//! A pipeline is one Idle → … → Idle cycle started by an accepted trigger.
//! [`PipelineRequest`] exists only while that cycle runs; at most one exists
//! at a time and it is owned by the FSM context.

use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Maximum tag code length in bytes.
pub const TAG_CAPACITY: usize = 32;

/// Tag identifier read by the detector.
pub type TagCode = heapless::String<TAG_CAPACITY>;

/// Build a [`TagCode`] from wire text.  Surrounding whitespace is dropped.
pub fn tag_code(raw: &str) -> Result<TagCode, ProtocolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Malformed("empty tag".into()));
    }
    let mut tag = TagCode::new();
    tag.push_str(trimmed)
        .map_err(|()| ProtocolError::TagTooLong)?;
    Ok(tag)
}

/// A detection observed on the device link, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub tag: TagCode,
    /// Monotonic milliseconds at which the detection was observed.
    pub observed_at_ms: u64,
}

impl TriggerEvent {
    pub fn new(tag: TagCode, observed_at_ms: u64) -> Self {
        Self {
            tag,
            observed_at_ms,
        }
    }
}

/// Identity of one pipeline run.  Worker outcomes carry it back so late
/// results from an abandoned run are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Theme handed to the generator, derived from the tag code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Theme(pub String);

impl Theme {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single active pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub id: PipelineId,
    pub tag: TagCode,
    pub theme: Theme,
    pub accepted_at_ms: u64,
    /// Deadline of the stage currently in flight (monotonic ms).
    pub deadline_ms: u64,
}

/// Generated fortune, scoped to one pipeline.  Also the print document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub text_lines: Vec<String>,
    pub theme: Theme,
    pub tag: TagCode,
}

/// Work order for the generation worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub pipeline: PipelineId,
    pub tag: TagCode,
    pub theme: Theme,
    /// Time the backend may take; the worker turns it into a deadline.
    pub budget: Duration,
}

/// Work order for the print worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub pipeline: PipelineId,
    pub document: PipelineResult,
}

/// Short fixed receipts printed around the pipeline, when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    /// Printed once when the service starts.
    Online,
    /// A tag was accepted and generation started.
    Consulting,
    /// Generation failed or timed out.
    Unclear,
}

impl Notice {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Consulting => "consulting",
            Self::Unclear => "unclear",
        }
    }

    pub const fn lines(self) -> &'static [&'static str] {
        match self {
            Self::Online => &[
                "DIVINOFAX ONLINE",
                "Place your item on the reader",
                "to receive your fortune...",
            ],
            Self::Consulting => &["Consulting the cosmic energies..."],
            Self::Unclear => &["The spirits are unclear today.", "Please try again later."],
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split generated text into printable lines, dropping blanks.
pub fn text_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}
