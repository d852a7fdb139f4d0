//! Serial port abstraction.
//!
//! The UART communicator talks to a [`Port`], so the protocol code above it
//! can be exercised against in-memory ports in tests and against the
//! `serialport` crate on real hardware.
//!
//! ```text
//! +--------------------------+
//! | discovery / upgrade      |
//! +------------+-------------+
//!              |
//! +------------v-------------+
//! | SerialCommunicator<P>    |
//! +------------+-------------+
//!              |
//! +------------v-------------+
//! | Port (NativePort, mocks) |
//! +--------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rates tried in order when probing a serial unit.
pub const PROBE_BAUD_RATES: &[u32] = &[460800, 921600, 230400, 115200];

/// Serial line settings. Every supported unit runs 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout used when nothing else is requested.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Settings for `port_name` at `baud_rate` with a 100 ms read timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(100),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Byte-level serial port.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Switch the line rate; bootloaders listen at a different one.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Current line rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Port name/path.
    fn name(&self) -> &str;

    /// Release the OS handle.
    fn close(&mut self) -> Result<()>;

    /// Write and flush `buf`.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Lists the serial ports of the host.
pub trait PortEnumerator {
    /// Every port the OS reports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115200).with_timeout(Duration::from_secs(2));
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_probe_rates_start_with_application_rate() {
        assert_eq!(PROBE_BAUD_RATES[0], 460800);
        assert!(PROBE_BAUD_RATES.contains(&115200));
    }
}
