//! External generator process adapter.
//!
//! The configured program receives one JSON line on stdin,
//! `{"theme": "...", "tag": "..."}`, and prints the fortune text on stdout.
//! The process is polled rather than waited on so the deadline and the
//! cancel token are honoured; either one kills it.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, warn};
use serde_json::json;

use crate::app::ports::{CancelToken, GenerationAdapter, GenerationRequest};
use crate::config::GenerationConfig;
use crate::error::GenerationError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct ProcessGenerator {
    program: String,
    args: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn spawn(&self) -> Result<Child, GenerationError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| GenerationError::BackendFailure(format!("spawn '{}': {}", self.program, e)))
    }
}

/// Kill and reap.  The stdout reader is left to finish on its own.
fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("generator: kill failed: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!("generator: reaping pid {} failed: {}", child.id(), e);
    }
}

impl GenerationAdapter for ProcessGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<String, GenerationError> {
        let mut child = self.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = json!({ "theme": request.theme.as_str(), "tag": request.tag.as_str() });
            if let Err(e) = writeln!(stdin, "{}", payload) {
                debug!("generator: stdin closed early: {}", e);
            }
        }

        // The reader is never joined: a grandchild holding stdout open must
        // not hold the caller past the deadline.
        let stdout = child.stdout.take();
        let (output_tx, output) = channel::bounded(1);
        let spawned = thread::Builder::new()
            .name("gen-stdout".into())
            .spawn(move || {
                let mut out = String::new();
                if let Some(mut pipe) = stdout {
                    if let Err(e) = pipe.read_to_string(&mut out) {
                        debug!("generator: stdout read failed: {}", e);
                    }
                }
                if output_tx.send(out).is_err() {
                    debug!("generator: output arrived after the caller gave up");
                }
            });
        if let Err(e) = spawned {
            stop(&mut child);
            return Err(GenerationError::BackendFailure(format!("stdout reader: {}", e)));
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    stop(&mut child);
                    return Err(GenerationError::BackendFailure(format!("wait: {}", e)));
                }
            }
            if cancel.is_cancelled() {
                stop(&mut child);
                debug!("generator: cancelled");
                return Err(GenerationError::Cancelled);
            }
            if Instant::now() >= request.deadline {
                stop(&mut child);
                warn!("generator: '{}' overran its deadline, killed", self.program);
                return Err(GenerationError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let text = loop {
            match output.recv_timeout(POLL_INTERVAL) {
                Ok(text) => break text,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GenerationError::BackendFailure("stdout reader died".into()));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            if Instant::now() >= request.deadline {
                warn!("generator: '{}' exited but its stdout stayed open", self.program);
                return Err(GenerationError::Timeout);
            }
        };
        if !status.success() {
            return Err(GenerationError::BackendFailure(format!(
                "'{}' exited with {}",
                self.program, status
            )));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::BackendFailure("empty output".into()));
        }
        Ok(text.to_owned())
    }
}
