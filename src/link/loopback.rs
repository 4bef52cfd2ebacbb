//! In-memory connector.  Each `connect` creates a fresh pipe pair and hands
//! the device side to the test (or bench) as a [`DeviceEnd`].
//!
//! Dropping a `DeviceEnd` looks like an unplugged cable to the host: the
//! reader sees end-of-stream and writes fail with `BrokenPipe`.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;

use super::codec::LineDecoder;
use super::protocol::{Command, CorrelationId, PushEvent, Response};
use super::transport::{Connector, TransportPair};

/// Host-side read poll; mirrors a short serial read timeout.
const READ_POLL: Duration = Duration::from_millis(20);

struct Switchboard {
    accept_tx: Sender<DeviceEnd>,
    refuse: AtomicBool,
    attempts: AtomicU32,
}

pub struct LoopbackConnector {
    board: Arc<Switchboard>,
}

/// Device side of the switchboard: accepts connections made by the host.
pub struct LoopbackDevice {
    accept_rx: Receiver<DeviceEnd>,
    board: Arc<Switchboard>,
}

impl LoopbackConnector {
    pub fn pair() -> (LoopbackConnector, LoopbackDevice) {
        let (accept_tx, accept_rx) = channel::unbounded();
        let board = Arc::new(Switchboard {
            accept_tx,
            refuse: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });
        (
            LoopbackConnector {
                board: Arc::clone(&board),
            },
            LoopbackDevice { accept_rx, board },
        )
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self) -> io::Result<TransportPair> {
        self.board.attempts.fetch_add(1, Ordering::AcqRel);
        if self.board.refuse.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "loopback refusing connections",
            ));
        }
        let (to_device, from_host) = channel::unbounded();
        let (to_host, from_device) = channel::unbounded();
        self.board
            .accept_tx
            .send(DeviceEnd::new(from_host, to_host))
            .map_err(|_| io::Error::from(io::ErrorKind::NotConnected))?;
        Ok(TransportPair {
            reader: Box::new(PipeReader::new(from_device)),
            writer: Box::new(PipeWriter { tx: to_device }),
        })
    }

    fn describe(&self) -> String {
        "loopback".into()
    }
}

impl LoopbackDevice {
    /// Wait for the host's next connection.
    pub fn accept(&self, timeout: Duration) -> Option<DeviceEnd> {
        self.accept_rx.recv_timeout(timeout).ok()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.board.refuse.store(refuse, Ordering::Release);
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.board.attempts.load(Ordering::Acquire)
    }

    /// Accept the next connection on a background thread and answer every
    /// command with `handler` until the host closes it.
    pub fn serve_next<F>(&self, accept_timeout: Duration, handler: F) -> JoinHandle<()>
    where
        F: FnMut(&Command) -> Option<Response> + Send + 'static,
    {
        let accept_rx = self.accept_rx.clone();
        thread::spawn(move || {
            if let Ok(end) = accept_rx.recv_timeout(accept_timeout) {
                end.serve(handler);
            }
        })
    }
}

/// Canned device answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Error(String),
    /// Never answer; lets the host's deadline expire.
    Silent,
}

impl Reply {
    pub fn for_command(self, command: &Command) -> Option<Response> {
        self.for_id(command.id)
    }

    pub fn for_id(self, id: CorrelationId) -> Option<Response> {
        match self {
            Self::Ok(result) => Some(Response::ok(id, result)),
            Self::Error(message) => Some(Response::error(id, message)),
            Self::Silent => None,
        }
    }
}

/// The controller's side of one connection.
pub struct DeviceEnd {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    decoder: LineDecoder,
    lines: VecDeque<String>,
    host_closed: bool,
}

impl DeviceEnd {
    fn new(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>) -> Self {
        Self {
            rx,
            tx,
            decoder: LineDecoder::new(),
            lines: VecDeque::new(),
            host_closed: false,
        }
    }

    /// Next line written by the host, if one arrives in time.
    pub fn next_line(&mut self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Some(line);
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.rx.recv_timeout(left) {
                Ok(chunk) => {
                    let lines = &mut self.lines;
                    self.decoder.feed(&chunk, |line| {
                        if let Ok(line) = line {
                            lines.push_back(line.to_owned());
                        }
                    });
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    self.host_closed = true;
                    return None;
                }
            }
        }
    }

    /// Next line parsed as a command.  Lines that do not parse are skipped.
    pub fn next_command(&mut self, timeout: Duration) -> Option<Command> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            let line = self.next_line(left)?;
            if let Ok(command) = serde_json::from_str(&line) {
                return Some(command);
            }
        }
    }

    /// `true` once the host dropped its side of the pipe.
    pub fn host_closed(&self) -> bool {
        self.host_closed
    }

    pub fn write_raw(&self, bytes: &[u8]) -> bool {
        bytes.is_empty() || self.tx.send(bytes.to_vec()).is_ok()
    }

    pub fn write_line(&self, line: &str) -> bool {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_raw(&bytes)
    }

    pub fn respond(&self, response: &Response) -> bool {
        serde_json::to_string(response).is_ok_and(|line| self.write_line(&line))
    }

    pub fn push(&self, event: &PushEvent) -> bool {
        serde_json::to_string(event).is_ok_and(|line| self.write_line(&line))
    }

    /// A handle that can push lines from another thread while this end is
    /// busy serving.  The host keeps seeing the connection open while any
    /// pusher is alive.
    pub fn pusher(&self) -> DevicePusher {
        DevicePusher {
            tx: self.tx.clone(),
        }
    }

    /// Answer commands with `handler` until the host closes the connection.
    pub fn serve<F>(mut self, mut handler: F)
    where
        F: FnMut(&Command) -> Option<Response>,
    {
        while !self.host_closed {
            if let Some(command) = self.next_command(Duration::from_millis(50)) {
                if let Some(response) = handler(&command) {
                    self.respond(&response);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct DevicePusher {
    tx: Sender<Vec<u8>>,
}

impl DevicePusher {
    pub fn push(&self, event: &PushEvent) -> bool {
        let Ok(mut bytes) = serde_json::to_vec(event) else {
            return false;
        };
        bytes.push(b'\n');
        self.tx.send(bytes).is_ok()
    }

    pub fn write_line(&self, line: &str) -> bool {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.tx.send(bytes).is_ok()
    }
}

struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.chunk.len() {
            match self.rx.recv_timeout(READ_POLL) {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = (self.chunk.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
