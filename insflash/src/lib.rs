//! # insflash
//!
//! Host-side driver for RTK/INS navigation units.
//!
//! This crate talks to units over a serial line or raw Ethernet and
//! provides:
//!
//! - The two `55 55` framings with their CRC-16
//! - Request/reply correlation over a shared receive stream
//! - Discovery: identification, classification and handshake retries
//! - Combined firmware image parsing and building
//! - A firmware upgrade engine driven by per-model profile tables
//!
//! ## Supported Models
//!
//! - INS401, INS502 (Ethernet)
//! - RTK330L, Beidou INS (UART)
//!
//! ## Features
//!
//! - `native` (default): serial links via the `serialport` crate
//! - `ethernet` (default): raw Ethernet via `pnet_datalink`
//! - `serde`: serialization of policies and identities
//!
//! ## Example
//!
//! ```rust,no_run
//! use insflash::{DeviceKind, Driver, SerialCommunicator, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let link = SerialCommunicator::open(&SerialConfig::new("/dev/ttyUSB0", 460800))?;
//!         let mut driver = Driver::new(link);
//!         let unit = driver.discover(&[DeviceKind::Rtk330l])?;
//!         println!("found {} {}", unit.kind, unit.identity.serial_number);
//!
//!         driver.start_upgrade("firmware.bin", &[], &mut |event| {
//!             println!("{event:?}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod upgrade;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
#[cfg(feature = "ethernet")]
pub use host::list_interfaces;
pub use {
    device::{DeviceKind, DeviceProfile, DeviceRecord, DeviceRegistry},
    discovery::{DeviceIdentity, DeviceMode, DiscoveryPolicy, PingInfo},
    driver::{DeviceHandle, Driver},
    error::{Error, Result},
    host::{BridgeKind, DetectedPort, auto_detect_port, detect_ports},
    image::{DEFAULT_RULES, FirmwareImage, SectionRule, UpgradeSection, combine},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, PacketType, ReadPolicy},
    transport::{
        Communicator, EthernetCommunicator, EthernetConfig, LinkDialect, SerialCommunicator,
        TransportKind,
    },
    upgrade::{StopHandle, UpgradeEvent, UpgradeGroup, UpgradePolicy, UpgradeWorker},
};
