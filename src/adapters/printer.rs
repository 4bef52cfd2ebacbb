//! ESC/POS thermal printer adapter.
//!
//! Receipt byte stream:
//! ```text
//! ESC @            initialise
//! [DLE EOT 4]      paper sensor query (optional; one status byte back)
//! <line> LF ...    fortune text
//! ESC d n          feed n lines
//! ```
//!
//! The serial port is opened on first use and reopened after any failure,
//! so an unplugged printer costs one `PrintError` per receipt rather than
//! a crash.

use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use serialport::SerialPort;

use crate::app::pipeline::{Notice, PipelineResult};
use crate::app::ports::PrintAdapter;
use crate::config::PrinterConfig;
use crate::error::PrintError;
use crate::link::lock;
use crate::link::serial::open_port;

const ESC: u8 = 0x1B;
const DLE: u8 = 0x10;
const EOT: u8 = 0x04;

pub const INIT: [u8; 2] = [ESC, b'@'];
pub const PAPER_STATUS_QUERY: [u8; 3] = [DLE, EOT, 4];
/// Paper-end bits of the roll sensor status byte.
const PAPER_END_MASK: u8 = 0b0110_0000;

const PORT_TIMEOUT: Duration = Duration::from_secs(1);

pub fn feed(lines: u8) -> [u8; 3] {
    [ESC, b'd', lines]
}

/// Render and send one receipt to an open port.
pub fn print_to<P: Read + Write + ?Sized, S: AsRef<str>>(
    port: &mut P,
    lines: &[S],
    feed_lines: u8,
    paper_check: bool,
) -> Result<(), PrintError> {
    port.write_all(&INIT)?;

    if paper_check {
        port.write_all(&PAPER_STATUS_QUERY)?;
        port.flush()?;
        let mut status = [0u8; 1];
        match port.read(&mut status) {
            Ok(1) if status[0] & PAPER_END_MASK != 0 => {
                return Err(PrintError::fault("paper out"));
            }
            Ok(1) => {}
            Ok(_) => return Err(PrintError::fault("no paper status reply")),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                return Err(PrintError::fault("printer not responding"));
            }
            Err(e) => return Err(e.into()),
        }
    }

    for line in lines {
        port.write_all(line.as_ref().as_bytes())?;
        port.write_all(b"\n")?;
    }
    port.write_all(&feed(feed_lines))?;
    port.flush()?;
    Ok(())
}

pub struct SerialPrinter {
    config: PrinterConfig,
    port: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialPrinter {
    /// Does not touch the port; it is opened by the first `print`.
    pub fn new(config: PrinterConfig) -> Self {
        Self {
            config,
            port: Mutex::new(None),
        }
    }
}

impl SerialPrinter {
    fn send_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), PrintError> {
        let mut slot = lock(&self.port);
        if slot.is_none() {
            let port = open_port(&self.config.port, self.config.baudrate, PORT_TIMEOUT)
                .map_err(|e| PrintError::fault(format!("open {}: {}", self.config.port, e)))?;
            info!("printer: opened {} @ {} baud", self.config.port, self.config.baudrate);
            *slot = Some(port);
        }
        let Some(port) = slot.as_mut() else {
            return Err(PrintError::fault("printer port unavailable"));
        };

        let result = print_to(&mut **port, lines, self.config.feed_lines, self.config.paper_check);
        if let Err(e) = &result {
            warn!("printer: {}; port will be reopened", e);
            *slot = None;
        }
        result
    }
}

impl PrintAdapter for SerialPrinter {
    fn print(&self, document: &PipelineResult) -> Result<(), PrintError> {
        self.send_lines(&document.text_lines)?;
        info!(
            "printer: {} line(s) for tag {}",
            document.text_lines.len(),
            document.tag
        );
        Ok(())
    }

    fn print_notice(&self, notice: Notice) -> Result<(), PrintError> {
        self.send_lines(notice.lines())?;
        info!("printer: {} notice", notice);
        Ok(())
    }
}
