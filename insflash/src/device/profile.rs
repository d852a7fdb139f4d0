//! Per-model upgrade tables.
//!
//! Every supported model is described by a static [`DeviceProfile`]: how it
//! identifies itself, which sections its images carry, how each section is
//! written and which jumps bracket each group. The upgrade engine is generic
//! over these tables.

use std::time::Duration;

use crate::device::DeviceKind;
use crate::discovery::{IdentityLayout, PingTarget};
use crate::image::{DEFAULT_RULES, SectionRule};
use crate::protocol::PacketType;
use crate::transport::{LinkDialect, TransportKind};
use crate::upgrade::{
    BlockFormat, BlockSize, HookStep, LengthField, PrepareStep, Settle, UpgradeGroup,
};

/// Whether a step is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRule {
    /// Always, whatever the identity says.
    Always,
    /// As decided from the device identity.
    Identity,
}

impl AckRule {
    /// Resolve against the identity-based decision.
    pub const fn resolve(self, identity_ack: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Identity => identity_ack,
        }
    }
}

/// How one section is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProfile {
    /// Section name ("rtk", "ins", ...).
    pub name: &'static str,
    /// Display name of the write worker.
    pub worker_name: &'static str,
    /// Jump group.
    pub group: UpgradeGroup,
    /// Block framing.
    pub block: BlockFormat,
    /// Block size rule.
    pub block_size: BlockSize,
    /// Acknowledgement rule.
    pub ack: AckRule,
    /// Steps before the first block.
    pub before_write: &'static [HookStep],
    /// Steps after the first block.
    pub first_packet: &'static [HookStep],
}

/// One mode jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpProfile {
    /// Display name.
    pub name: &'static str,
    /// Command tag.
    pub command: PacketType,
    /// Reply tag.
    pub reply: PacketType,
    /// Dialect pinned for the command, if any.
    pub dialect: Option<LinkDialect>,
    /// Whether the command carries the rtk and ins section CRCs.
    pub section_crcs: bool,
    /// Retry window when acknowledged.
    pub timeout: Duration,
    /// Retry window when the unit already reports bootloader mode.
    pub timeout_in_bootloader: Option<Duration>,
    /// Acknowledgement rule.
    pub ack: AckRule,
    /// Steps before the command.
    pub before: &'static [HookStep],
    /// Steps after the command.
    pub after: &'static [HookStep],
    /// Steps between unanswered retry rounds; empty retries in one flat loop.
    pub between_rounds: &'static [HookStep],
}

/// The jump pair bracketing one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupJumps {
    /// Group bracketed.
    pub group: UpgradeGroup,
    /// Inserted before the group's first write.
    pub to_bootloader: JumpProfile,
    /// Inserted after the group's last write.
    pub to_application: JumpProfile,
}

/// Static description of one model.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Model.
    pub kind: DeviceKind,
    /// Token the identification reply must contain.
    pub device_type: &'static str,
    /// Link the model is reached through.
    pub transport: TransportKind,
    /// Application name tokens.
    pub app_names: &'static [&'static str],
    /// Word layout of the identification reply.
    pub layout: IdentityLayout,
    /// Section order of the model's images.
    pub rules: &'static [SectionRule],
    /// Writable sections.
    pub targets: &'static [TargetProfile],
    /// Jump pairs per group.
    pub jumps: &'static [GroupJumps],
    /// Serial rate the bootloader listens at.
    pub bootloader_baud: Option<u32>,
}

impl DeviceProfile {
    /// What discovery must match.
    pub const fn ping_target(&self) -> PingTarget<'static> {
        PingTarget {
            device_type: self.device_type,
            app_names: self.app_names,
            layout: self.layout,
        }
    }

    /// Target for a section name.
    pub fn target(&self, name: &str) -> Option<&'static TargetProfile> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Jump pair of a group.
    pub fn jumps_for(&self, group: UpgradeGroup) -> Option<&'static GroupJumps> {
        self.jumps.iter().find(|j| j.group == group)
    }

    /// Names of the writable sections.
    pub fn target_names(&self) -> impl Iterator<Item = &'static str> {
        self.targets.iter().map(|t| t.name)
    }
}

const ETH_JUMP_BOOTLOADER: PacketType = PacketType::new(0x01, 0xAA);
const ETH_JUMP_APPLICATION: PacketType = PacketType::new(0x02, 0xAA);
const ETH_WRITE: PacketType = PacketType::new(0x03, 0xAA);
const ETH_PREPARE: PacketType = PacketType::new(0x04, 0xAA);
const IMU_WRITE: PacketType = PacketType::new(0x41, 0x57);
const IMU_WRITE_REPLY: PacketType = PacketType::new(0x57, 0x41);
const IMU_JUMP_BOOTLOADER: PacketType = PacketType::new(0x49, 0x4A);
const IMU_JUMP_BOOTLOADER_REPLY: PacketType = PacketType::new(0x4A, 0x49);
const IMU_JUMP_APPLICATION: PacketType = PacketType::new(0x41, 0x4A);
const IMU_JUMP_APPLICATION_REPLY: PacketType = PacketType::new(0x4A, 0x41);

const UART_PREPARE: PacketType = PacketType::ascii(b"CS");
const UART_WRITE: PacketType = PacketType::ascii(b"WA");
const UART_JUMP_BOOTLOADER: PacketType = PacketType::ascii(b"JI");
const UART_JUMP_APPLICATION: PacketType = PacketType::ascii(b"JA");

/// Rate the UART bootloaders listen at.
pub const UART_BOOTLOADER_BAUD: u32 = 115_200;

const CORE_RTK: u8 = b'0';
const CORE_INS: u8 = b'1';

// Ethernet models (INS401, INS502)

const ETH_MAIN_BLOCK: BlockFormat = BlockFormat {
    packet_type: ETH_WRITE,
    reply: ETH_WRITE,
    length: LengthField::U32,
    dialect: None,
};

const ETH_MAIN_BLOCK_SIZE: BlockSize = BlockSize::ByDialect {
    length: 960,
    zero: 192,
};

const IMU_BLOCK: BlockFormat = BlockFormat {
    packet_type: IMU_WRITE,
    reply: IMU_WRITE_REPLY,
    length: LengthField::U8,
    dialect: Some(LinkDialect::LENGTH_AS_PROTOCOL),
};

const ETH_TARGETS: &[TargetProfile] = &[
    TargetProfile {
        name: "rtk",
        worker_name: "MAIN_RTK",
        group: UpgradeGroup::Main,
        block: ETH_MAIN_BLOCK,
        block_size: ETH_MAIN_BLOCK_SIZE,
        ack: AckRule::Identity,
        before_write: &[HookStep::Prepare(PrepareStep {
            packet_type: ETH_PREPARE,
            core: CORE_RTK,
        })],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketMain)],
    },
    TargetProfile {
        name: "ins",
        worker_name: "MAIN_INS",
        group: UpgradeGroup::Main,
        block: ETH_MAIN_BLOCK,
        block_size: ETH_MAIN_BLOCK_SIZE,
        ack: AckRule::Identity,
        before_write: &[HookStep::Prepare(PrepareStep {
            packet_type: ETH_PREPARE,
            core: CORE_INS,
        })],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketMain)],
    },
    TargetProfile {
        name: "imu_boot",
        worker_name: "SUB_IMU_BOOT",
        group: UpgradeGroup::ImuBoot,
        block: IMU_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketImu)],
    },
    TargetProfile {
        name: "imu",
        worker_name: "SUB_IMU",
        group: UpgradeGroup::Imu,
        block: IMU_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketImu)],
    },
];

const IMU_TO_BOOTLOADER: JumpProfile = JumpProfile {
    name: "SUB_IMU_JUMP_BOOTLOADER",
    command: IMU_JUMP_BOOTLOADER,
    reply: IMU_JUMP_BOOTLOADER_REPLY,
    dialect: Some(LinkDialect::LENGTH_AS_PROTOCOL),
    section_crcs: false,
    timeout: Duration::from_secs(30),
    timeout_in_bootloader: None,
    ack: AckRule::Always,
    before: &[HookStep::Sleep(Settle::BeforeImuJump)],
    after: &[],
    between_rounds: &[HookStep::ResetImu, HookStep::Reshake],
};

const IMU_TO_APPLICATION: JumpProfile = JumpProfile {
    name: "SUB_IMU_JUMP_APPLICATION",
    command: IMU_JUMP_APPLICATION,
    reply: IMU_JUMP_APPLICATION_REPLY,
    dialect: Some(LinkDialect::LENGTH_AS_PROTOCOL),
    section_crcs: false,
    timeout: Duration::from_secs(3),
    timeout_in_bootloader: None,
    ack: AckRule::Always,
    before: &[],
    after: &[],
    between_rounds: &[],
};

const ETH_JUMPS: &[GroupJumps] = &[
    GroupJumps {
        group: UpgradeGroup::Main,
        to_bootloader: JumpProfile {
            name: "MAIN_JUMP_BOOTLOADER",
            command: ETH_JUMP_BOOTLOADER,
            reply: ETH_JUMP_BOOTLOADER,
            dialect: None,
            section_crcs: false,
            timeout: Duration::from_secs(3),
            timeout_in_bootloader: Some(Duration::from_secs(1)),
            ack: AckRule::Identity,
            before: &[HookStep::Reshake],
            after: &[HookStep::ConfirmBootloader],
            between_rounds: &[],
        },
        to_application: JumpProfile {
            name: "MAIN_JUMP_APPLICATION",
            command: ETH_JUMP_APPLICATION,
            reply: ETH_JUMP_APPLICATION,
            dialect: None,
            section_crcs: true,
            timeout: Duration::from_secs(4),
            timeout_in_bootloader: None,
            ack: AckRule::Identity,
            before: &[],
            after: &[HookStep::Reshake],
            between_rounds: &[],
        },
    },
    GroupJumps {
        group: UpgradeGroup::ImuBoot,
        to_bootloader: IMU_TO_BOOTLOADER,
        to_application: IMU_TO_APPLICATION,
    },
    GroupJumps {
        group: UpgradeGroup::Imu,
        to_bootloader: IMU_TO_BOOTLOADER,
        to_application: JumpProfile {
            after: &[HookStep::ResetImu],
            ..IMU_TO_APPLICATION
        },
    },
];

/// Application tokens of the Ethernet models.
const ETH_APP_NAMES: &[&str] = &["RAWDATA", "RTK", "RTK_INS"];

const ETH_BASE: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Ins401,
    device_type: "INS401",
    transport: TransportKind::Ethernet,
    app_names: ETH_APP_NAMES,
    layout: IdentityLayout::Standard,
    rules: DEFAULT_RULES,
    targets: ETH_TARGETS,
    jumps: ETH_JUMPS,
    bootloader_baud: None,
};

/// INS401.
pub static INS401: DeviceProfile = ETH_BASE;

/// INS502.
pub static INS502: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Ins502,
    device_type: "INS502",
    ..ETH_BASE
};

// Serial models (RTK330L, Beidou)

const UART_BLOCK: BlockFormat = BlockFormat {
    packet_type: UART_WRITE,
    reply: UART_WRITE,
    length: LengthField::U8,
    dialect: None,
};

const UART_JUMPS: &[GroupJumps] = &[GroupJumps {
    group: UpgradeGroup::Main,
    to_bootloader: JumpProfile {
        name: "JUMP_BOOTLOADER",
        command: UART_JUMP_BOOTLOADER,
        reply: UART_JUMP_BOOTLOADER,
        dialect: None,
        section_crcs: false,
        timeout: Duration::from_secs(1),
        timeout_in_bootloader: None,
        ack: AckRule::Always,
        before: &[],
        after: &[],
        between_rounds: &[],
    },
    to_application: JumpProfile {
        name: "JUMP_APPLICATION",
        command: UART_JUMP_APPLICATION,
        reply: UART_JUMP_APPLICATION,
        dialect: None,
        section_crcs: false,
        timeout: Duration::from_secs(1),
        timeout_in_bootloader: None,
        ack: AckRule::Always,
        before: &[],
        after: &[HookStep::ApplicationBaud, HookStep::PingUntilFound],
        between_rounds: &[],
    },
}];

const RTK330L_RULES: &[SectionRule] = &[
    SectionRule::new("rtk", "rtk_start:"),
    SectionRule::new("ins", "ins_start:"),
    SectionRule::new("sdk", "sdk_start:"),
];

const RTK330L_TARGETS: &[TargetProfile] = &[
    TargetProfile {
        name: "rtk",
        worker_name: "rtk",
        group: UpgradeGroup::Main,
        block: UART_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[
            HookStep::BootloaderBaud(UART_BOOTLOADER_BAUD),
            HookStep::Prepare(PrepareStep {
                packet_type: UART_PREPARE,
                core: CORE_RTK,
            }),
        ],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketMain)],
    },
    TargetProfile {
        name: "ins",
        worker_name: "ins",
        group: UpgradeGroup::Main,
        block: UART_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[
            HookStep::BootloaderBaud(UART_BOOTLOADER_BAUD),
            HookStep::Prepare(PrepareStep {
                packet_type: UART_PREPARE,
                core: CORE_INS,
            }),
        ],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketMain)],
    },
];

/// RTK330L.
pub static RTK330L: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Rtk330l,
    device_type: "RTK330L",
    transport: TransportKind::Serial,
    app_names: &["RTK_INS"],
    layout: IdentityLayout::Standard,
    rules: RTK330L_RULES,
    targets: RTK330L_TARGETS,
    jumps: UART_JUMPS,
    bootloader_baud: Some(UART_BOOTLOADER_BAUD),
};

const BEIDOU_RULES: &[SectionRule] = &[
    SectionRule::new("ins", "ins_start:"),
    SectionRule::new("imu", "imu_start:"),
];

const BEIDOU_TARGETS: &[TargetProfile] = &[
    TargetProfile {
        name: "ins",
        worker_name: "INS",
        group: UpgradeGroup::Main,
        block: UART_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[
            HookStep::BootloaderBaud(UART_BOOTLOADER_BAUD),
            HookStep::Prepare(PrepareStep {
                packet_type: UART_PREPARE,
                core: CORE_INS,
            }),
        ],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketMain)],
    },
    TargetProfile {
        name: "imu",
        worker_name: "IMU",
        group: UpgradeGroup::Main,
        block: UART_BLOCK,
        block_size: BlockSize::Fixed(192),
        ack: AckRule::Always,
        before_write: &[HookStep::BootloaderBaud(UART_BOOTLOADER_BAUD)],
        first_packet: &[HookStep::Sleep(Settle::FirstPacketBeidouImu)],
    },
];

/// Beidou INS.
pub static BEIDOU: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Beidou,
    device_type: "INS",
    transport: TransportKind::Serial,
    app_names: &["INS"],
    layout: IdentityLayout::Beidou,
    rules: BEIDOU_RULES,
    targets: BEIDOU_TARGETS,
    jumps: UART_JUMPS,
    bootloader_baud: Some(UART_BOOTLOADER_BAUD),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_target_has_a_rule_and_jumps() {
        for kind in DeviceKind::ALL {
            let profile = kind.profile();
            assert_eq!(profile.kind, *kind);
            for target in profile.targets {
                assert!(
                    profile.rules.iter().any(|r| r.name == target.name),
                    "{} has no rule for {}",
                    profile.device_type,
                    target.name
                );
                assert!(profile.jumps_for(target.group).is_some());
            }
        }
    }

    #[test]
    fn test_sdk_is_parsed_but_not_written() {
        assert!(INS401.rules.iter().any(|r| r.name == "sdk"));
        assert!(INS401.target("sdk").is_none());
        assert!(RTK330L.target("sdk").is_none());
    }

    #[test]
    fn test_ins502_shares_ins401_tables() {
        assert_eq!(INS502.device_type, "INS502");
        assert_eq!(INS502.targets, INS401.targets);
        assert_eq!(INS502.ping_target().app_names, INS401.app_names);
    }

    #[test]
    fn test_imu_jump_resets_only_application_image() {
        let imu = INS401.jumps_for(UpgradeGroup::Imu).unwrap();
        let imu_boot = INS401.jumps_for(UpgradeGroup::ImuBoot).unwrap();
        assert_eq!(imu.to_application.after, &[HookStep::ResetImu]);
        assert!(imu_boot.to_application.after.is_empty());
    }

    #[test]
    fn test_only_imu_bootloader_jumps_recover_between_rounds() {
        for group in [UpgradeGroup::ImuBoot, UpgradeGroup::Imu] {
            let jumps = INS401.jumps_for(group).unwrap();
            assert_eq!(
                jumps.to_bootloader.between_rounds,
                &[HookStep::ResetImu, HookStep::Reshake]
            );
            assert!(jumps.to_application.between_rounds.is_empty());
        }
        let main = INS401.jumps_for(UpgradeGroup::Main).unwrap();
        assert!(main.to_bootloader.between_rounds.is_empty());
        for jumps in RTK330L.jumps.iter().chain(BEIDOU.jumps) {
            assert!(jumps.to_bootloader.between_rounds.is_empty());
        }
    }

    #[test]
    fn test_ack_rule() {
        assert!(AckRule::Always.resolve(false));
        assert!(!AckRule::Identity.resolve(false));
        assert!(AckRule::Identity.resolve(true));
    }
}
