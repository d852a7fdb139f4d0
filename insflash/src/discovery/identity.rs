//! Device identity parsed from the identification reply.

use std::cmp::Ordering;
use std::fmt;

use crate::discovery::PingInfo;

/// Bootloader from which the prepare command carries the target name and the
/// application jump carries section CRCs.
pub const NAMED_PREPARE_BOOTLOADER: &str = "01.01";

/// Execution context the unit reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceMode {
    /// Running application firmware.
    Application,
    /// Waiting in the bootloader.
    Bootloader,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Application => "application",
            Self::Bootloader => "bootloader",
        })
    }
}

/// How the words of a reply map to identity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityLayout {
    /// `<name> <pn> <sn> <?> <hardware>` followed by the application text.
    Standard,
    /// `<name> <imu> <pn> <firmware> SN:<sn>`.
    Beidou,
}

/// Facts learned about the unit during discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceIdentity {
    /// Model name.
    pub name: String,
    /// Part number.
    pub part_number: String,
    /// Serial number text.
    pub serial_number: String,
    /// Hardware revision.
    pub hardware: Option<String>,
    /// Application name token.
    pub app_name: Option<String>,
    /// Application firmware version.
    pub firmware_version: Option<String>,
    /// Bootloader version without the leading `v`.
    pub bootloader_version: Option<String>,
    /// Reported mode.
    pub mode: Option<DeviceMode>,
}

fn strip_v(word: &str) -> String {
    word.strip_prefix('v')
        .or_else(|| word.strip_prefix('V'))
        .unwrap_or(word)
        .to_string()
}

fn word(words: &[&str], index: usize) -> String {
    words.get(index).map_or_else(String::new, |w| (*w).to_string())
}

impl DeviceIdentity {
    /// Parse the texts returned by a ping.
    pub fn parse(info: &PingInfo, layout: IdentityLayout) -> Self {
        match layout {
            IdentityLayout::Standard => Self::parse_standard(info),
            IdentityLayout::Beidou => Self::parse_beidou(info),
        }
    }

    fn parse_standard(info: &PingInfo) -> Self {
        let words: Vec<&str> = info.device_info.split_whitespace().collect();
        match info.mode {
            DeviceMode::Bootloader => {
                let serial_number = info
                    .device_info
                    .split_once("SN:")
                    .and_then(|(_, rest)| rest.split_whitespace().next())
                    .unwrap_or_default()
                    .to_string();
                Self {
                    name: word(&words, 0),
                    part_number: word(&words, 2),
                    serial_number,
                    bootloader_version: words.get(2).map(|w| strip_v(w)),
                    mode: Some(DeviceMode::Bootloader),
                    ..Self::default()
                }
            },
            DeviceMode::Application => {
                let app: Vec<&str> = info.app_info.split_whitespace().collect();
                let bootloader = app
                    .iter()
                    .position(|w| *w == "Bootloader")
                    .and_then(|i| app.get(i + 1))
                    .or_else(|| app.get(4))
                    .map(|w| strip_v(w));
                Self {
                    name: word(&words, 0),
                    part_number: word(&words, 1),
                    serial_number: word(&words, 2),
                    hardware: words.get(4).map(|w| (*w).to_string()),
                    app_name: app.first().map(|w| (*w).to_string()),
                    firmware_version: app.get(2).map(|w| (*w).to_string()),
                    bootloader_version: bootloader,
                    mode: Some(DeviceMode::Application),
                }
            },
        }
    }

    fn parse_beidou(info: &PingInfo) -> Self {
        let words: Vec<&str> = info.device_info.split_whitespace().collect();
        let serial = word(&words, 4);
        Self {
            name: word(&words, 0),
            hardware: words.get(1).map(|w| (*w).to_string()),
            part_number: word(&words, 2),
            firmware_version: words.get(3).map(|w| (*w).to_string()),
            serial_number: serial.strip_prefix("SN:").unwrap_or(&serial).to_string(),
            mode: Some(info.mode),
            ..Self::default()
        }
    }

    /// Whether the bootloader is at least `min`. Unknown versions are not.
    pub fn bootloader_at_least(&self, min: &str) -> bool {
        self.bootloader_version
            .as_deref()
            .is_some_and(|v| compare_versions(v, min) != Ordering::Less)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} PN:{} SN:{}", self.name, self.part_number, self.serial_number)?;
        if let Some(fw) = &self.firmware_version {
            write!(f, " firmware {fw}")?;
        }
        if let Some(bl) = &self.bootloader_version {
            write!(f, " bootloader {bl}")?;
        }
        if let Some(mode) = self.mode {
            write!(f, " ({mode})")?;
        }
        Ok(())
    }
}

/// Compare dotted versions numerically, so "01.10" sorts after "01.9".
///
/// Non-numeric components fall back to a string comparison.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(x), None) => {
                if x.trim_start_matches('0').is_empty() {
                    continue;
                }
                return Ordering::Greater;
            },
            (None, Some(y)) => {
                if y.trim_start_matches('0').is_empty() {
                    continue;
                }
                return Ordering::Less;
            },
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            },
        }
    }
}

/// Decides whether a unit acknowledges upgrade traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AckPolicy {
    /// Units with a serial number up to this one predate universal ACK.
    pub legacy_serial_max: u64,
    /// Bootloader version that brought ACK to legacy units.
    pub legacy_ack_bootloader: String,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            legacy_serial_max: 2_209_000_531,
            legacy_ack_bootloader: "01.02".to_string(),
        }
    }
}

impl AckPolicy {
    /// Whether `identity` requires acknowledged writes and jumps.
    pub fn requires_ack(&self, identity: &DeviceIdentity) -> bool {
        match identity.serial_number.trim().parse::<u64>() {
            Ok(serial) if serial <= self.legacy_serial_max => {
                identity.bootloader_at_least(&self.legacy_ack_bootloader)
            },
            _ => true,
        }
    }
}
