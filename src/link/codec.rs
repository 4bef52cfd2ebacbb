//! Newline frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────────────────────────────┬────┐
//! │ UTF-8 JSON object (N B)      │ \n │
//! └──────────────────────────────┴────┘
//! ```
//!
//! The decoder accumulates bytes and yields complete lines.  A single
//! `read` may return part of a line, or several lines back to back.
//! A trailing `\r` is stripped and blank lines are skipped.

use serde::Serialize;

use crate::error::ProtocolError;

/// Maximum line length in bytes (protects against a runaway sender).
pub const MAX_LINE_LEN: usize = 4096;

/// Decoder state machine.
enum DecoderState {
    /// Collecting bytes of the current line.
    Collecting,
    /// Current line overflowed; dropping bytes until the next newline.
    Discarding,
}

/// Streaming line decoder.
pub struct LineDecoder {
    state: DecoderState,
    buf: Vec<u8>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Collecting,
            buf: Vec::with_capacity(256),
        }
    }

    /// Feed bytes into the decoder, calling `on_line` once per completed
    /// line.  Lines that are not UTF-8 or that overflowed are reported as
    /// errors; the decoder resynchronises at the next newline either way.
    pub fn feed(&mut self, data: &[u8], mut on_line: impl FnMut(Result<&str, ProtocolError>)) {
        for &byte in data {
            match self.state {
                DecoderState::Discarding => {
                    if byte == b'\n' {
                        self.state = DecoderState::Collecting;
                        on_line(Err(ProtocolError::LineTooLong));
                    }
                }
                DecoderState::Collecting if byte == b'\n' => {
                    let mut line = self.buf.as_slice();
                    if let [head @ .., b'\r'] = line {
                        line = head;
                    }
                    if !line.iter().all(u8::is_ascii_whitespace) {
                        match core::str::from_utf8(line) {
                            Ok(text) => on_line(Ok(text)),
                            Err(_) => on_line(Err(ProtocolError::Encoding)),
                        }
                    }
                    self.buf.clear();
                }
                DecoderState::Collecting => {
                    if self.buf.len() >= MAX_LINE_LEN {
                        self.buf.clear();
                        self.state = DecoderState::Discarding;
                    } else {
                        self.buf.push(byte);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Encode one message as a compact JSON line terminated by `\n`.
///
/// Compact `serde_json` output never contains a raw newline, so the result
/// is always exactly one frame.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = serde_json::to_vec(message)?;
    out.push(b'\n');
    Ok(out)
}
