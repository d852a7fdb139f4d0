//! Host network interfaces through `pnet_datalink`.

use std::io::{self, ErrorKind};
use std::time::Duration;

use log::{debug, warn};
use pnet_datalink::{Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};

use crate::error::{Error, Result};
use crate::protocol::MacAddr;
use crate::transport::{FrameReceiver, FrameSender};

/// A host network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// OS interface name.
    pub name: String,
    /// Hardware address, when the interface has one.
    pub mac: Option<MacAddr>,
    /// Description (Windows adapters carry one).
    pub description: String,
    /// Whether the interface is administratively up.
    pub is_up: bool,
    /// Whether this is a loopback interface.
    pub is_loopback: bool,
}

impl From<&NetworkInterface> for InterfaceInfo {
    fn from(iface: &NetworkInterface) -> Self {
        Self {
            name: iface.name.clone(),
            mac: iface.mac.map(convert_mac),
            description: iface.description.clone(),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
        }
    }
}

fn convert_mac(mac: pnet_datalink::MacAddr) -> MacAddr {
    MacAddr([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5])
}

/// List host interfaces.
pub fn interfaces() -> Vec<InterfaceInfo> {
    pnet_datalink::interfaces()
        .iter()
        .map(InterfaceInfo::from)
        .collect()
}

/// An opened raw channel.
pub struct RawLink {
    /// Hardware address of the interface.
    pub mac: MacAddr,
    /// Outbound half.
    pub tx: Box<dyn FrameSender>,
    /// Inbound half.
    pub rx: Box<dyn FrameReceiver>,
}

/// Open a raw channel on the interface called `name`.
pub fn open(name: &str, read_timeout: Duration) -> Result<RawLink> {
    let iface = pnet_datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| Error::Config(format!("no network interface named {name}")))?;
    let mac = iface
        .mac
        .map(convert_mac)
        .ok_or_else(|| Error::Unsupported(format!("interface {name} has no hardware address")))?;
    if !iface.is_up() {
        warn!("Interface {name} is down");
    }

    let config = Config {
        read_timeout: Some(read_timeout),
        ..Config::default()
    };
    match pnet_datalink::channel(&iface, config)? {
        Channel::Ethernet(tx, rx) => {
            debug!("Opened raw channel on {name} ({mac})");
            Ok(RawLink {
                mac,
                tx: Box::new(PnetSender(tx)),
                rx: Box::new(PnetReceiver(rx)),
            })
        },
        _ => Err(Error::Unsupported(format!(
            "interface {name} does not provide an Ethernet channel"
        ))),
    }
}

struct PnetSender(Box<dyn DataLinkSender>);

impl FrameSender for PnetSender {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self.0.send_to(frame, None) {
            Some(result) => Ok(result?),
            None => Err(Error::Io(io::Error::other("no transmit buffer available"))),
        }
    }
}

struct PnetReceiver(Box<dyn DataLinkReceiver>);

impl FrameReceiver for PnetReceiver {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.0.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interfaces_does_not_panic() {
        let _ = interfaces();
    }

    #[test]
    fn test_open_unknown_interface_fails() {
        let err = open("insflash-no-such-if0", Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_mac_conversion() {
        let mac = pnet_datalink::MacAddr::new(1, 2, 3, 4, 5, 6);
        assert_eq!(convert_mac(mac), MacAddr([1, 2, 3, 4, 5, 6]));
    }
}
