//! Building and running an upgrade session.

use log::{debug, info, warn};

use crate::device::{JumpProfile, TargetProfile};
use crate::discovery::DeviceMode;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::Command;
use crate::protocol::crc::crc16_bytes;
use crate::transport::{Communicator, LinkDialect};
use crate::upgrade::firmware::FirmwareWriteWorker;
use crate::upgrade::hooks::HookPoint;
use crate::upgrade::jump::{JumpDirection, JumpWorker};
use crate::upgrade::{SessionState, UpgradeEvent, UpgradeGroup, UpgradeWorker};

/// Sections whose CRCs accompany the Ethernet jump back to the application.
const CRC_SECTIONS: [&str; 2] = ["rtk", "ins"];

/// CRC of the first `len & 0xFFFF` bytes of each section, rtk then ins.
fn section_crcs(image: &FirmwareImage) -> Vec<u8> {
    CRC_SECTIONS
        .iter()
        .filter_map(|name| image.section(name))
        .flat_map(|section| {
            let len = section.len() & 0xFFFF;
            crc16_bytes(&section.content[..len])
        })
        .collect()
}

fn write_worker(
    target: &TargetProfile,
    content: &[u8],
    ack: bool,
    dialect: Option<LinkDialect>,
    session: &SessionState,
) -> UpgradeWorker {
    let block_size = target.block_size.resolve(target.block.dialect.or(dialect));
    let mut worker = FirmwareWriteWorker::new(
        target.worker_name,
        target.name,
        target.group,
        content,
        target.ack.resolve(ack),
        block_size,
        target.block,
        session.policy.write.clone(),
    );
    worker
        .hooks_mut()
        .steps(HookPoint::BeforeWrite, target.before_write)
        .steps(HookPoint::FirstPacket, target.first_packet);
    UpgradeWorker::FirmwareWrite(worker)
}

fn jump_worker(
    jump: &JumpProfile,
    group: UpgradeGroup,
    direction: JumpDirection,
    ack: bool,
    crcs: &[u8],
    session: &SessionState,
) -> UpgradeWorker {
    let mut command = Command::new(jump.command).with_reply(jump.reply);
    if let Some(dialect) = jump.dialect {
        command = command.with_dialect(dialect);
    }
    let timeout = match jump.timeout_in_bootloader {
        Some(shorter) if session.identity.mode == Some(DeviceMode::Bootloader) => shorter,
        _ => jump.timeout,
    };
    let policy = session.policy.jump.clone();
    let rounds = !jump.between_rounds.is_empty();
    let attempts = if rounds {
        policy.rounds(timeout).saturating_mul(policy.round_size.max(1))
    } else {
        policy.attempts(timeout)
    };
    let round_size = policy.round_size;
    let mut worker = JumpWorker::new(
        jump.name,
        group,
        direction,
        command,
        jump.ack.resolve(ack),
        attempts,
        policy,
    );
    if jump.section_crcs {
        worker = worker.with_section_crcs(crcs.to_vec());
    }
    if rounds {
        worker = worker.with_rounds(round_size);
    }
    worker
        .hooks_mut()
        .steps(HookPoint::BeforeCommand, jump.before)
        .steps(HookPoint::AfterCommand, jump.after)
        .steps(HookPoint::BetweenRounds, jump.between_rounds);
    match direction {
        JumpDirection::ToBootloader => UpgradeWorker::JumpToBootloader(worker),
        JumpDirection::ToApplication => UpgradeWorker::JumpToApplication(worker),
    }
}

/// Parse `image` and lay out the workers of one session.
///
/// `enabled` restricts the written sections; an empty list enables all.
/// Each group's writes are bracketed by that group's jump pair.
pub fn build_pipeline(
    image: &[u8],
    enabled: &[&str],
    session: &SessionState,
    dialect: Option<LinkDialect>,
) -> Result<Vec<UpgradeWorker>> {
    let profile = session.profile;
    let image = FirmwareImage::parse(image, profile.rules)?;
    let ack = session.policy.ack.requires_ack(&session.identity);
    debug!(
        "Building pipeline for {} (ack {})",
        profile.device_type,
        if ack { "on" } else { "off" }
    );

    let mut workers = Vec::new();
    for section in image.sections() {
        if !enabled.is_empty() && !enabled.contains(&section.name.as_str()) {
            debug!("Skipping {} section: not selected", section.name);
            continue;
        }
        let Some(target) = profile.target(&section.name) else {
            warn!(
                "{} carries a {} section that cannot be written; skipping",
                profile.device_type, section.name
            );
            continue;
        };
        workers.push(write_worker(target, &section.content, ack, dialect, session));
    }

    let crcs = section_crcs(&image);
    for jumps in profile.jumps {
        let in_group = |w: &UpgradeWorker| w.is_write() && w.group() == jumps.group;
        let Some(first) = workers.iter().position(in_group) else {
            continue;
        };
        let Some(last) = workers.iter().rposition(in_group) else {
            continue;
        };
        workers.insert(
            last + 1,
            jump_worker(
                &jumps.to_application,
                jumps.group,
                JumpDirection::ToApplication,
                ack,
                &crcs,
                session,
            ),
        );
        workers.insert(
            first,
            jump_worker(
                &jumps.to_bootloader,
                jumps.group,
                JumpDirection::ToBootloader,
                ack,
                &crcs,
                session,
            ),
        );
    }

    Ok(workers)
}

/// Run `workers` in order. The first failure ends the session.
pub fn run_pipeline(
    workers: &mut [UpgradeWorker],
    link: &mut dyn Communicator,
    session: &mut SessionState,
    events: &mut dyn FnMut(&UpgradeEvent),
) -> Result<()> {
    if workers.is_empty() {
        return Err(Error::InvalidImage(
            "image carries no section for this device".into(),
        ));
    }
    let count = workers.len();
    for (index, worker) in workers.iter_mut().enumerate() {
        info!("[{}/{count}] {}", index + 1, worker.name());
        events(&UpgradeEvent::WorkerStarted {
            key: worker.key().to_string(),
            name: worker.name().to_string(),
            total: worker.content_size(),
        });
        worker.run(link, session, events)?;
    }
    info!("Upgrade of {} finished", session.profile.device_type);
    Ok(())
}
