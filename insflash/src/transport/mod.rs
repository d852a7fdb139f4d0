//! Physical links to a unit.
//!
//! A [`Communicator`] moves encoded frames over one link. The serial variant
//! is a thin wrapper over a [`Port`](crate::port::Port); the Ethernet variant
//! owns a background capture thread feeding a bounded cache.

#[cfg(feature = "ethernet")]
pub mod datalink;
pub mod ethernet;
pub mod serial;

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{Command, Framing};

pub use ethernet::{CapturedFrame, EthernetCommunicator, EthernetConfig, FrameReceiver, FrameSender};
pub use serial::SerialCommunicator;

/// Kind of physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// UART, usually through a USB bridge.
    Serial,
    /// Raw Ethernet (100BASE-T1).
    Ethernet,
}

impl TransportKind {
    /// Wire format spoken on this transport.
    pub const fn framing(self) -> Framing {
        match self {
            Self::Serial => Framing::Uart,
            Self::Ethernet => Framing::Ethernet,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "uart",
            Self::Ethernet => "eth",
        })
    }
}

/// Ethernet framing convention learned during handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkDialect {
    /// Whether the frame length field carries the body size.
    pub use_length_as_protocol: bool,
}

impl LinkDialect {
    /// The length field carries the body size.
    pub const LENGTH_AS_PROTOCOL: Self = Self {
        use_length_as_protocol: true,
    };

    /// The length field is always zero.
    pub const ZERO_LENGTH: Self = Self {
        use_length_as_protocol: false,
    };

    /// The other convention.
    #[must_use]
    pub const fn other(self) -> Self {
        Self {
            use_length_as_protocol: !self.use_length_as_protocol,
        }
    }
}

impl Default for LinkDialect {
    fn default() -> Self {
        Self::LENGTH_AS_PROTOCOL
    }
}

/// One link to one unit.
pub trait Communicator: Send {
    /// Transport kind.
    fn kind(&self) -> TransportKind;

    /// Human readable link name (port path or interface name).
    fn name(&self) -> &str;

    /// Send already encoded bytes.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Take the next chunk of inbound data, waiting at most `max_wait`.
    fn read(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>>;

    /// Drop everything received so far.
    fn reset_buffer(&mut self) -> Result<()>;

    /// Whether the link is open for writing.
    fn can_write(&self) -> bool;

    /// Encode `command` for this link's current addressing and dialect.
    fn encode(&self, command: &Command) -> Result<Vec<u8>>;

    /// Wire format; follows from the transport kind.
    fn framing(&self) -> Framing {
        self.kind().framing()
    }

    /// Encode and send a command.
    fn send_command(&mut self, command: &Command) -> Result<()> {
        let frame = self.encode(command)?;
        self.send(&frame)
    }

    /// Link-level handshake. Ethernet learns the peer address and dialect
    /// here; serial links have nothing to negotiate.
    fn handshake(&mut self) -> Result<()> {
        Ok(())
    }

    /// Dialect learned by the last handshake, if the transport has one.
    fn dialect(&self) -> Option<LinkDialect> {
        None
    }

    /// Restrict inbound traffic to upgrade replies while a session runs.
    fn set_upgrading(&mut self, _upgrading: bool) {}

    /// Current serial line rate, if the link has one.
    fn baud_rate(&self) -> Option<u32> {
        None
    }

    /// Change the serial line rate.
    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} link has no baud rate",
            self.kind()
        )))
    }
}

impl<C: Communicator + ?Sized> Communicator for Box<C> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn read(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>> {
        (**self).read(max_wait)
    }

    fn reset_buffer(&mut self) -> Result<()> {
        (**self).reset_buffer()
    }

    fn can_write(&self) -> bool {
        (**self).can_write()
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        (**self).encode(command)
    }

    fn framing(&self) -> Framing {
        (**self).framing()
    }

    fn send_command(&mut self, command: &Command) -> Result<()> {
        (**self).send_command(command)
    }

    fn handshake(&mut self) -> Result<()> {
        (**self).handshake()
    }

    fn dialect(&self) -> Option<LinkDialect> {
        (**self).dialect()
    }

    fn set_upgrading(&mut self, upgrading: bool) {
        (**self).set_upgrading(upgrading);
    }

    fn baud_rate(&self) -> Option<u32> {
        (**self).baud_rate()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }
}
