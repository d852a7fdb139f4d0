//! Supported models and the registry of bound units.
//!
//! Each [`DeviceKind`] maps to a static [`DeviceProfile`] describing how the
//! model identifies itself and how its images are written.

pub mod profile;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::transport::TransportKind;

pub use profile::{AckRule, DeviceProfile, GroupJumps, JumpProfile, TargetProfile};
pub use registry::{DeviceRecord, DeviceRegistry};

/// Supported models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// RTK330L (UART).
    Rtk330l,
    /// INS401 (Ethernet).
    Ins401,
    /// INS502 (Ethernet).
    Ins502,
    /// Beidou INS (UART).
    Beidou,
}

impl DeviceKind {
    /// Every supported model.
    pub const ALL: &'static [Self] = &[Self::Rtk330l, Self::Ins401, Self::Ins502, Self::Beidou];

    /// Static tables of this model.
    pub fn profile(self) -> &'static DeviceProfile {
        match self {
            Self::Rtk330l => &profile::RTK330L,
            Self::Ins401 => &profile::INS401,
            Self::Ins502 => &profile::INS502,
            Self::Beidou => &profile::BEIDOU,
        }
    }

    /// Lowercase name accepted on the command line.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rtk330l => "rtk330l",
            Self::Ins401 => "ins401",
            Self::Ins502 => "ins502",
            Self::Beidou => "beidou",
        }
    }

    /// Link the model is reached through.
    pub fn transport(self) -> TransportKind {
        self.profile().transport
    }

    /// Models reachable over `transport`.
    pub fn for_transport(transport: TransportKind) -> impl Iterator<Item = Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(move |kind| kind.transport() == transport)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown device model: {s}")))
    }
}
