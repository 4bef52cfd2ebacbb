//! Connector abstraction: anything that can open a byte channel to the
//! controller.
//!
//! Concrete implementations:
//! - USB CDC / UART serial port ([`super::serial::SerialConnector`])
//! - In-memory pipe pair ([`super::loopback::LoopbackConnector`])
//!
//! The link is generic over `Connector`, so reconnect, heartbeat and
//! correlation logic never change with the transport.

use std::io::{self, Read, Write};

/// The two halves of one open channel.  The reader is owned by the reader
/// thread, the writer by the link's write mutex.
pub struct TransportPair {
    /// Reads should time out periodically (`ErrorKind::TimedOut`) so the
    /// reader thread can notice teardown.  `Ok(0)` means end of stream.
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens a fresh channel for every session.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<TransportPair>;

    /// Human-readable endpoint for log lines.
    fn describe(&self) -> String;
}
