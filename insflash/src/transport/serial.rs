//! UART communicator.

use std::io::ErrorKind;
use std::time::Duration;

use log::{Level, log_enabled, trace};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{Command, uart};
use crate::transport::{Communicator, TransportKind};

/// Bytes read from the port per call.
const READ_CHUNK: usize = 1024;

/// Synchronous UART link. The OS driver does the buffering.
pub struct SerialCommunicator<P: Port> {
    port: P,
    open: bool,
}

impl<P: Port> SerialCommunicator<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self { port, open: true }
    }

    /// Underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Close the port; further writes are refused.
    pub fn close(&mut self) -> Result<()> {
        self.open = false;
        self.port.close()
    }
}

#[cfg(feature = "native")]
impl SerialCommunicator<crate::port::NativePort> {
    /// Open a native serial port.
    pub fn open(config: &crate::port::SerialConfig) -> Result<Self> {
        Ok(Self::new(crate::port::NativePort::open(config)?))
    }
}

impl<P: Port> Communicator for SerialCommunicator<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn name(&self) -> &str {
        self.port.name()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if log_enabled!(Level::Trace) {
            trace!("{} TX {}", self.port.name(), hex(bytes));
        }
        self.port.write_all_bytes(bytes)
    }

    fn read(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>> {
        self.port.set_timeout(max_wait)?;
        let mut buf = vec![0u8; READ_CHUNK];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                if log_enabled!(Level::Trace) {
                    trace!("{} RX {}", self.port.name(), hex(&buf));
                }
                Ok(Some(buf))
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.port.clear_buffers()
    }

    fn can_write(&self) -> bool {
        self.open
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        uart::encode(command.packet_type, &command.payload)
    }

    fn baud_rate(&self) -> Option<u32> {
        Some(self.port.baud_rate())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if self.port.baud_rate() != baud_rate {
            self.port.set_baud_rate(baud_rate)?;
        }
        Ok(())
    }
}

/// Hex dump for trace logs.
pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(out, "{byte:02x} ");
    }
    out.pop();
    out
}
