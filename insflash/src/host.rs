//! Host-side enumeration of serial ports and network interfaces.
//!
//! Serial units sit behind a USB-to-UART bridge; the bridges fitted to the
//! supported boards are FTDI and CP210x. Ethernet units are reached through
//! any up, non-loopback interface with a hardware address.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// USB-to-UART bridge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// FTDI FT232/FT2232/FT4232 (fitted to evaluation kits).
    Ftdi,
    /// Silicon Labs CP210x.
    Cp210x,
    /// CH340/CH341.
    Ch340,
    /// Prolific PL2303.
    Prolific,
    /// Not a known bridge.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (0x0403, &[], BridgeKind::Ftdi),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], BridgeKind::Cp210x),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], BridgeKind::Ch340),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, bridge) in KNOWN_BRIDGES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *bridge;
            }
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a known bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Bridges fitted to the supported units.
    pub fn is_preferred(&self) -> bool {
        matches!(self, Self::Ftdi | Self::Cp210x)
    }
}

/// A serial port with its USB metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Bridge classification.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_bridge"))]
    pub bridge: BridgeKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

#[cfg(feature = "serde")]
fn serialize_bridge<S: serde::Serializer>(
    bridge: &BridgeKind,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(bridge.name())
}

impl From<crate::port::PortInfo> for DetectedPort {
    fn from(info: crate::port::PortInfo) -> Self {
        let bridge = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => BridgeKind::from_vid_pid(vid, pid),
            _ => BridgeKind::Unknown,
        };
        Self {
            name: info.name,
            bridge,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// List serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(DetectedPort::from)
            .inspect(|port| {
                trace!("Found port: {} ({})", port.name, port.bridge.name());
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// List serial ports (no serial backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the best candidate among `ports`.
pub fn select_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.bridge.is_preferred())
        .or_else(|| ports.iter().find(|p| p.bridge.is_known()))
        .or_else(|| ports.first())
}

/// Auto-detect a single serial port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = select_port(&ports).ok_or(Error::DeviceNotFound)?;
    info!("Auto-detected {} port: {}", port.bridge.name(), port.name);
    Ok(port.clone())
}

/// Auto-detect a single serial port (no serial backend compiled in).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "serial support was not compiled in".to_string(),
    ))
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let bridge = if port.bridge.is_known() {
                format!(" [{}]", port.bridge.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{bridge}{product}", port.name)
        })
        .collect()
}

/// Interfaces usable for raw Ethernet: up, not loopback, with a MAC.
#[cfg(feature = "ethernet")]
pub fn list_interfaces() -> Vec<crate::transport::datalink::InterfaceInfo> {
    crate::transport::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up && !iface.is_loopback && iface.mac.is_some())
        .collect()
}
