//! Error types for the Divinofax engine.
//!
//! Each layer owns one enum.  Transport and protocol faults stay inside the
//! device link; generation and print faults terminate a pipeline attempt and
//! are folded into a [`PipelineFault`] by the state machine.

use core::fmt;

// ---------------------------------------------------------------------------
// Transport errors (device link)
// ---------------------------------------------------------------------------

/// A `send` on the device link did not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No response arrived before the per-command deadline.
    Timeout,
    /// The session was torn down while the command was pending.
    Disconnected,
    /// No session is open (reconnect in progress).
    NotConnected,
    /// Reconnect attempts are exhausted; the link is a no-op sink.
    Unavailable,
    /// Writing the command to the port failed.
    Io(std::io::ErrorKind),
    /// The command could not be serialised.
    Encode,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "command timed out"),
            Self::Disconnected => write!(f, "link disconnected while waiting"),
            Self::NotConnected => write!(f, "link not connected"),
            Self::Unavailable => write!(f, "device unavailable (degraded)"),
            Self::Io(kind) => write!(f, "write failed: {kind}"),
            Self::Encode => write!(f, "command encode failed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.kind())
    }
}

// ---------------------------------------------------------------------------
// Protocol errors (inbound lines)
// ---------------------------------------------------------------------------

/// An inbound line could not be turned into a response or push event.
/// Always logged and discarded; never fails a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line is not valid UTF-8.
    Encoding,
    /// Line is not a JSON object of the expected shape.
    Malformed(String),
    /// Object carries neither an `id` nor an `event` field.
    Unrecognized,
    /// Line exceeded the decoder's maximum length.
    LineTooLong,
    /// Detection carried a tag longer than [`crate::app::pipeline::TAG_CAPACITY`].
    TagTooLong,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding => write!(f, "line is not UTF-8"),
            Self::Malformed(detail) => write!(f, "malformed message: {detail}"),
            Self::Unrecognized => write!(f, "message has neither id nor event"),
            Self::LineTooLong => write!(f, "line too long"),
            Self::TagTooLong => write!(f, "tag code too long"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Generation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The backend did not finish before its deadline.
    Timeout,
    /// The backend failed or produced unusable output.
    BackendFailure(String),
    /// The orchestrator cancelled the call (shutdown or stage deadline).
    Cancelled,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "generation timed out"),
            Self::BackendFailure(detail) => write!(f, "generation failed: {detail}"),
            Self::Cancelled => write!(f, "generation cancelled"),
        }
    }
}

impl std::error::Error for GenerationError {}

// ---------------------------------------------------------------------------
// Print errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintErrorKind {
    /// Printer absent, out of paper, or the write failed.
    Fault,
    /// The printer did not accept the job in time.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintError {
    pub kind: PrintErrorKind,
    pub detail: String,
}

impl PrintError {
    pub fn fault(detail: impl Into<String>) -> Self {
        Self {
            kind: PrintErrorKind::Fault,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: PrintErrorKind::Timeout,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PrintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PrintErrorKind::Fault => write!(f, "print fault: {}", self.detail),
            PrintErrorKind::Timeout => write!(f, "print timed out: {}", self.detail),
        }
    }
}

impl std::error::Error for PrintError {}

impl From<std::io::Error> for PrintError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(e.to_string())
        } else {
            Self::fault(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline faults (reason carried by the Error state)
// ---------------------------------------------------------------------------

/// Why a pipeline attempt ended in the `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineFault {
    GenerationTimeout,
    GenerationFailed,
    PrintFault,
    PrintTimeout,
}

impl PipelineFault {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationFailed => "generation_failed",
            Self::PrintFault => "print_fault",
            Self::PrintTimeout => "print_timeout",
        }
    }
}

impl fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&GenerationError> for PipelineFault {
    fn from(e: &GenerationError) -> Self {
        match e {
            GenerationError::Timeout => Self::GenerationTimeout,
            GenerationError::BackendFailure(_) | GenerationError::Cancelled => {
                Self::GenerationFailed
            }
        }
    }
}

impl From<&PrintError> for PipelineFault {
    fn from(e: &PrintError) -> Self {
        match e.kind {
            PrintErrorKind::Fault => Self::PrintFault,
            PrintErrorKind::Timeout => Self::PrintTimeout,
        }
    }
}
