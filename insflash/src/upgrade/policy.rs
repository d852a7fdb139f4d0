//! Timing and retry budgets for upgrade sessions.
//!
//! The defaults are tuned against real units. They are plain data so hosts
//! can load overrides from configuration.

use std::time::Duration;

use crate::discovery::{AckPolicy, DiscoveryPolicy};
use crate::protocol::request::ReadPolicy;

/// Block write budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WritePolicy {
    /// Erase time granted per started [`erase_unit`](Self::erase_unit).
    pub erase_per_unit: Duration,
    /// Content size covered by one erase allowance.
    pub erase_unit: usize,
    /// Wait after the first block is sent.
    pub first_block_settle: Duration,
    /// Attempts per block after the first.
    pub block_attempts: u32,
    /// Reply budget of one block acknowledgement.
    pub ack_read: ReadPolicy,
    /// Sends per block when the unit does not acknowledge.
    pub no_ack_repeats: u32,
    /// Wait after each unacknowledged block.
    pub no_ack_interval: Duration,
    /// Part of the erase budget already covered by the first-block settle.
    pub no_ack_erase_margin: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            erase_per_unit: Duration::from_secs(8),
            erase_unit: 102_400,
            first_block_settle: Duration::from_secs(5),
            block_attempts: 3,
            ack_read: ReadPolicy::with_attempts(1000),
            no_ack_repeats: 3,
            no_ack_interval: Duration::from_millis(50),
            no_ack_erase_margin: Duration::from_secs(5),
        }
    }
}

impl WritePolicy {
    /// Time the unit needs to erase `total` bytes.
    pub fn erase_budget(&self, total: usize) -> Duration {
        let units = total.div_ceil(self.erase_unit.max(1));
        u32::try_from(units)
            .ok()
            .and_then(|units| self.erase_per_unit.checked_mul(units))
            .unwrap_or(Duration::MAX)
    }

    /// Attempts for the first block, which also covers the erase.
    pub fn first_block_attempts(&self, total: usize) -> u32 {
        let secs = self.erase_budget(total).as_secs();
        u32::try_from(secs.saturating_add(4) / 5)
            .unwrap_or(u32::MAX)
            .max(1)
    }

    /// Blind wait after the first block when nothing is acknowledged.
    pub fn no_ack_erase_wait(&self, total: usize) -> Duration {
        self.erase_budget(total)
            .saturating_sub(self.no_ack_erase_margin)
    }

    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            erase_per_unit: Duration::ZERO,
            first_block_settle: Duration::ZERO,
            ack_read: instant_read(),
            no_ack_interval: Duration::ZERO,
            no_ack_erase_margin: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Mode jump budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct JumpPolicy {
    /// Spacing of acknowledged jump attempts.
    pub attempt_interval: Duration,
    /// Reply budget of one attempt.
    pub read: ReadPolicy,
    /// Blind wait after an unacknowledged jump.
    pub no_ack_settle: Duration,
    /// Attempts per round for jumps that recover between rounds.
    pub round_size: u32,
    /// Retry window covered by one round.
    pub round_span: Duration,
}

impl Default for JumpPolicy {
    fn default() -> Self {
        Self {
            attempt_interval: Duration::from_millis(500),
            read: ReadPolicy::with_attempts(1000),
            no_ack_settle: Duration::from_secs(10),
            round_size: 5,
            round_span: Duration::from_secs(5),
        }
    }
}

impl JumpPolicy {
    /// Attempts that fit into `timeout`, at least one.
    pub fn attempts(&self, timeout: Duration) -> u32 {
        let interval = self.attempt_interval.as_millis();
        if interval == 0 {
            return 1;
        }
        u32::try_from(timeout.as_millis().div_ceil(interval))
            .unwrap_or(u32::MAX)
            .max(1)
    }

    /// Rounds that fit into `timeout`, one per started
    /// [`round_span`](Self::round_span), at least one.
    pub fn rounds(&self, timeout: Duration) -> u32 {
        let span = self.round_span.as_millis();
        if span == 0 {
            return 1;
        }
        u32::try_from(timeout.as_millis().div_ceil(span))
            .unwrap_or(u32::MAX)
            .max(1)
    }

    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            attempt_interval: Duration::ZERO,
            read: instant_read(),
            no_ack_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Budgets of the prepare (erase) command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PreparePolicy {
    /// Acknowledged attempts.
    pub attempts: u32,
    /// Wait before each send.
    pub pre_send: Duration,
    /// Wait between a send and reading its reply.
    pub post_send: Duration,
    /// Reply budget of one attempt.
    pub read: ReadPolicy,
    /// Sends when the unit does not acknowledge.
    pub no_ack_repeats: u32,
    /// Wait after the unacknowledged sends.
    pub no_ack_settle: Duration,
}

impl Default for PreparePolicy {
    fn default() -> Self {
        Self::ethernet()
    }
}

impl PreparePolicy {
    /// Ethernet units: three slow attempts.
    pub fn ethernet() -> Self {
        Self {
            attempts: 3,
            pre_send: Duration::from_secs(1),
            post_send: Duration::from_secs(1),
            read: ReadPolicy::with_attempts(200),
            no_ack_repeats: 3,
            no_ack_settle: Duration::from_millis(500),
        }
    }

    /// Serial units: five attempts a second apart.
    pub fn uart() -> Self {
        Self {
            attempts: 5,
            pre_send: Duration::ZERO,
            ..Self::ethernet()
        }
    }

    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            pre_send: Duration::ZERO,
            post_send: Duration::ZERO,
            read: instant_read(),
            no_ack_settle: Duration::ZERO,
            ..Self::ethernet()
        }
    }
}

/// Fixed waits around mode transitions and flash erases.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SettlePolicy {
    /// After the first block of a main core.
    pub first_packet_main: Duration,
    /// After the first block of an IMU image.
    pub first_packet_imu: Duration,
    /// After the first block of a Beidou IMU image.
    pub first_packet_beidou_imu: Duration,
    /// Before jumping the IMU to its bootloader.
    pub before_imu_jump: Duration,
    /// Around the re-handshake that follows a bootloader jump.
    pub after_bootloader_jump: Duration,
    /// Spacing of IMU reset commands.
    pub imu_reset_interval: Duration,
    /// IMU reset commands sent.
    pub imu_reset_repeats: u32,
    /// Pings that confirm the bootloader after a jump.
    pub bootloader_pings: u32,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            first_packet_main: Duration::from_secs(15),
            first_packet_imu: Duration::from_secs(8),
            first_packet_beidou_imu: Duration::from_secs(20),
            before_imu_jump: Duration::from_secs(1),
            after_bootloader_jump: Duration::from_secs(3),
            imu_reset_interval: Duration::from_millis(200),
            imu_reset_repeats: 3,
            bootloader_pings: 3,
        }
    }
}

impl SettlePolicy {
    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            first_packet_main: Duration::ZERO,
            first_packet_imu: Duration::ZERO,
            first_packet_beidou_imu: Duration::ZERO,
            before_imu_jump: Duration::ZERO,
            after_bootloader_jump: Duration::ZERO,
            imu_reset_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Everything an upgrade session is tuned by.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UpgradePolicy {
    /// Block writes.
    pub write: WritePolicy,
    /// Mode jumps.
    pub jump: JumpPolicy,
    /// Prepare command on Ethernet.
    pub prepare_ethernet: PreparePolicy,
    /// Prepare command on serial links.
    pub prepare_uart: PreparePolicy,
    /// Fixed waits.
    pub settle: SettlePolicy,
    /// ACK decision.
    pub ack: AckPolicy,
    /// Discovery and re-handshake.
    pub discovery: DiscoveryPolicy,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            write: WritePolicy::default(),
            jump: JumpPolicy::default(),
            prepare_ethernet: PreparePolicy::ethernet(),
            prepare_uart: PreparePolicy::uart(),
            settle: SettlePolicy::default(),
            ack: AckPolicy::default(),
            discovery: DiscoveryPolicy::default(),
        }
    }
}

impl UpgradePolicy {
    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            write: WritePolicy::instant(),
            jump: JumpPolicy::instant(),
            prepare_ethernet: PreparePolicy::instant(),
            prepare_uart: PreparePolicy {
                attempts: 5,
                ..PreparePolicy::instant()
            },
            settle: SettlePolicy::instant(),
            ack: AckPolicy::default(),
            discovery: DiscoveryPolicy::instant(),
        }
    }
}

#[cfg(test)]
fn instant_read() -> ReadPolicy {
    ReadPolicy {
        attempts: 5,
        poll_interval: Duration::ZERO,
        timeout: Duration::from_secs(5),
    }
}
