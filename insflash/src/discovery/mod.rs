//! Locating a unit and classifying its reply.
//!
//! Discovery runs in three layers:
//!
//! 1. [`reshake`] repeats the link handshake until the transport has learned
//!    its peer (on Ethernet this also settles the dialect).
//! 2. [`ping`] sends the identification command and classifies the textual
//!    reply as application or bootloader mode.
//! 3. [`discover`] combines both into one bounded cycle.

pub mod identity;

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::request::{ReadPolicy, wait_for};
use crate::protocol::{Command, PacketType};
use crate::transport::{Communicator, TransportKind};

pub use identity::{
    AckPolicy, DeviceIdentity, DeviceMode, IdentityLayout, NAMED_PREPARE_BOOTLOADER,
    compare_versions,
};

/// Identification command on Ethernet links.
pub const IDENTIFY_ETHERNET: PacketType = PacketType::new(0x01, 0xCC);

/// Identification command on serial links.
pub const IDENTIFY_UART: PacketType = PacketType::ascii(b"pG");

/// Identification tag for a transport.
pub const fn identify_type(kind: TransportKind) -> PacketType {
    match kind {
        TransportKind::Serial => IDENTIFY_UART,
        TransportKind::Ethernet => IDENTIFY_ETHERNET,
    }
}

/// Classified identification reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingInfo {
    /// Device type token that matched.
    pub device_type: String,
    /// Device part of the reply.
    pub device_info: String,
    /// Application part of the reply (the whole reply in bootloader mode).
    pub app_info: String,
    /// Which context answered.
    pub mode: DeviceMode,
}

/// Timing of the discovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DiscoveryPolicy {
    /// Wait between sending the identification command and reading.
    pub ping_settle: Duration,
    /// Reply budget for Ethernet pings.
    pub ping_read: ReadPolicy,
    /// Reply budget for serial pings.
    pub uart_ping_read: ReadPolicy,
    /// Handshake attempts during discovery.
    pub handshake_attempts: u32,
    /// Spacing of discovery handshake attempts.
    pub handshake_interval: Duration,
    /// Handshake attempts after a mode jump.
    pub reshake_attempts: u32,
    /// Spacing of handshake attempts after a mode jump.
    pub reshake_interval: Duration,
    /// Settle time between a successful handshake and the first ping.
    pub post_handshake_settle: Duration,
    /// Pings tried before discovery gives up.
    pub confirm_pings: u32,
    /// Serial rates tried in order.
    pub baud_rates: Vec<u32>,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            ping_settle: Duration::from_millis(100),
            ping_read: ReadPolicy::with_attempts(500),
            uart_ping_read: ReadPolicy::with_attempts(100),
            handshake_attempts: 100,
            handshake_interval: Duration::from_millis(100),
            reshake_attempts: 100,
            reshake_interval: Duration::from_millis(500),
            post_handshake_settle: Duration::from_secs(1),
            confirm_pings: 3,
            baud_rates: crate::port::PROBE_BAUD_RATES.to_vec(),
        }
    }
}

impl DiscoveryPolicy {
    /// Reply budget for `kind`.
    pub fn ping_read_for(&self, kind: TransportKind) -> &ReadPolicy {
        match kind {
            TransportKind::Serial => &self.uart_ping_read,
            TransportKind::Ethernet => &self.ping_read,
        }
    }

    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        let read = ReadPolicy {
            attempts: 20,
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
        };
        Self {
            ping_settle: Duration::ZERO,
            ping_read: read,
            uart_ping_read: read,
            handshake_attempts: 3,
            handshake_interval: Duration::ZERO,
            reshake_attempts: 3,
            reshake_interval: Duration::ZERO,
            post_handshake_settle: Duration::ZERO,
            confirm_pings: 2,
            baud_rates: vec![460800, 115200],
        }
    }
}

/// Device type and application tokens a ping must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingTarget<'a> {
    /// Token that must appear anywhere in the reply.
    pub device_type: &'a str,
    /// Application tokens; the reply is split at the first one found.
    pub app_names: &'a [&'a str],
    /// Word layout of the reply.
    pub layout: IdentityLayout,
}

/// Normalise a reply payload: separators become spaces, NUL padding goes.
///
/// Replies that are not UTF-8 yield an empty string, which matches nothing.
pub fn reply_text(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.replace(',', " ").trim_end_matches('\0').to_string(),
        Err(e) => {
            warn!("Identification reply is not UTF-8: {e}");
            String::new()
        },
    }
}

/// Classify a normalised reply.
pub fn classify(target: PingTarget<'_>, text: &str) -> Option<PingInfo> {
    if !text.contains(target.device_type) {
        debug!(
            "{} != {}",
            target.device_type,
            text.split_whitespace().next().unwrap_or("<empty>")
        );
        return None;
    }

    // Beidou units carry their serial as `SN:` in every reply and have no
    // separate application part.
    if target.layout == IdentityLayout::Beidou {
        return Some(PingInfo {
            device_type: target.device_type.to_string(),
            device_info: text.to_string(),
            app_info: text.to_string(),
            mode: DeviceMode::Application,
        });
    }

    if text.contains("SN:") {
        return Some(PingInfo {
            device_type: target.device_type.to_string(),
            device_info: text.to_string(),
            app_info: text.to_string(),
            mode: DeviceMode::Bootloader,
        });
    }

    target.app_names.iter().find_map(|app| {
        let at = text.find(&format!(" {app}"))?;
        Some(PingInfo {
            device_type: target.device_type.to_string(),
            device_info: text[..at].to_string(),
            app_info: text[at + 1..].to_string(),
            mode: DeviceMode::Application,
        })
    })
}

/// Send the identification command and return the normalised reply text.
///
/// `Ok(None)` means no reply within the budget.
pub fn identify<C: Communicator + ?Sized>(
    link: &mut C,
    broadcast: bool,
    settle: Duration,
    read: &ReadPolicy,
) -> Result<Option<String>> {
    let tag = identify_type(link.kind());
    let mut command = Command::new(tag);
    if broadcast {
        command = command.broadcast();
    }
    link.reset_buffer()?;
    link.send_command(&command)?;
    thread::sleep(settle);
    match wait_for(link, tag, read) {
        Ok(payload) => Ok(Some(reply_text(&payload))),
        Err(e @ (Error::Timeout(_) | Error::CrcFailure { .. })) => {
            debug!("No identification reply: {e}");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

/// Ping once and classify the reply against each of `targets` in turn.
///
/// Returns the index of the matching target with the classified reply.
pub fn ping<C: Communicator + ?Sized>(
    link: &mut C,
    targets: &[PingTarget<'_>],
    policy: &DiscoveryPolicy,
) -> Result<Option<(usize, PingInfo)>> {
    let read = policy.ping_read_for(link.kind());
    let Some(text) = identify(link, false, policy.ping_settle, read)? else {
        return Ok(None);
    };
    Ok(targets
        .iter()
        .enumerate()
        .find_map(|(index, target)| classify(*target, &text).map(|info| (index, info))))
}

/// Repeat the link handshake until it succeeds.
pub fn reshake<C: Communicator + ?Sized>(
    link: &mut C,
    attempts: u32,
    interval: Duration,
) -> Result<()> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if crate::is_interrupted_requested() {
            return Err(Error::Stopped);
        }
        match link.handshake() {
            Ok(()) => {
                debug!("Handshake on {} succeeded (attempt {attempt})", link.name());
                return Ok(());
            },
            Err(e) if e.is_recoverable() => {
                debug!("Handshake attempt {attempt}/{attempts} failed: {e}");
            },
            Err(e) => return Err(e),
        }
        if attempt < attempts {
            thread::sleep(interval);
        }
    }
    Err(Error::DeviceNotFound)
}

/// Run one bounded discovery cycle.
///
/// Serial links are probed at every configured rate; Ethernet links
/// handshake first and then ping the learned peer.
pub fn discover<C: Communicator + ?Sized>(
    link: &mut C,
    targets: &[PingTarget<'_>],
    policy: &DiscoveryPolicy,
) -> Result<(usize, PingInfo)> {
    match link.kind() {
        TransportKind::Ethernet => {
            reshake(link, policy.handshake_attempts, policy.handshake_interval)?;
            thread::sleep(policy.post_handshake_settle);
            confirm(link, targets, policy)
        },
        TransportKind::Serial => {
            for &baud_rate in &policy.baud_rates {
                if crate::is_interrupted_requested() {
                    return Err(Error::Stopped);
                }
                debug!("Probing {} at {baud_rate} baud", link.name());
                link.set_baud_rate(baud_rate)?;
                match confirm(link, targets, policy) {
                    Ok(info) => return Ok(info),
                    Err(Error::DeviceNotFound) => {},
                    Err(e) => return Err(e),
                }
            }
            Err(Error::DeviceNotFound)
        },
    }
}

fn confirm<C: Communicator + ?Sized>(
    link: &mut C,
    targets: &[PingTarget<'_>],
    policy: &DiscoveryPolicy,
) -> Result<(usize, PingInfo)> {
    for _ in 0..policy.confirm_pings.max(1) {
        if let Some((index, found)) = ping(link, targets, policy)? {
            info!(
                "Found {} on {} in {} mode",
                found.device_type,
                link.name(),
                found.mode
            );
            return Ok((index, found));
        }
    }
    Err(Error::DeviceNotFound)
}
