//! Serial port connector (USB CDC on the controller board, or a UART).

use std::io;
use std::time::Duration;

use serialport::SerialPort;

use super::transport::{Connector, TransportPair};
use crate::config::LinkConfig;

/// Open a port with a read timeout.  Shared with the receipt printer.
pub fn open_port(path: &str, baudrate: u32, timeout: Duration) -> io::Result<Box<dyn SerialPort>> {
    serialport::new(path, baudrate)
        .timeout(timeout)
        .open()
        .map_err(io::Error::from)
}

pub struct SerialConnector {
    path: String,
    baudrate: u32,
    read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baudrate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baudrate,
            read_timeout,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.port.clone(),
            config.baudrate,
            Duration::from_millis(config.read_timeout_ms),
        )
    }
}

impl Connector for SerialConnector {
    fn connect(&self) -> io::Result<TransportPair> {
        let port = open_port(&self.path, self.baudrate, self.read_timeout)?;
        let writer = port.try_clone().map_err(io::Error::from)?;
        Ok(TransportPair {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baudrate)
    }
}
