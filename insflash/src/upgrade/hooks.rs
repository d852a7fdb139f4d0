//! Steps run at worker lifecycle points.
//!
//! Device profiles attach [`HookStep`]s to workers: prepare commands before a
//! write, settle delays after the first block, re-handshakes after a mode
//! jump. Hosts can add their own closures at the same points.

use std::fmt;
use std::thread;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::discovery::{
    self, DeviceIdentity, DeviceMode, NAMED_PREPARE_BOOTLOADER, identify, reshake,
};
use crate::error::{Error, Result};
use crate::protocol::request::wait_for;
use crate::protocol::{Command, PacketType};
use crate::transport::{Communicator, TransportKind};
use crate::upgrade::SessionState;

/// Type tag of the unacknowledged IMU reset.
pub const RESET_IMU: PacketType = PacketType::new(0x06, 0xCC);

/// Where in a worker's lifecycle a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before a jump command is sent.
    BeforeCommand,
    /// After a jump completed.
    AfterCommand,
    /// Between two unanswered rounds of a jump.
    BetweenRounds,
    /// Before the first block of a write.
    BeforeWrite,
    /// After the first block of a write went out.
    FirstPacket,
    /// After the last block of a write.
    AfterWrite,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeCommand => "before-command",
            Self::AfterCommand => "after-command",
            Self::BetweenRounds => "between-rounds",
            Self::BeforeWrite => "before-write",
            Self::FirstPacket => "first-packet",
            Self::AfterWrite => "after-write",
        })
    }
}

/// What a hook can reach while it runs.
pub struct HookContext<'a> {
    /// The session link.
    pub link: &'a mut dyn Communicator,
    /// Shared session facts.
    pub session: &'a mut SessionState,
    /// Key of the worker running the hook.
    pub key: &'a str,
    /// Unpadded length of the section being written, zero for jumps.
    pub section_len: usize,
    /// Whether the worker runs acknowledged.
    pub ack: bool,
}

/// Named waits; their lengths come from [`SettlePolicy`](crate::upgrade::SettlePolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Erase of a main core after its first block.
    FirstPacketMain,
    /// Erase of an IMU image after its first block.
    FirstPacketImu,
    /// Erase of a Beidou IMU image after its first block.
    FirstPacketBeidouImu,
    /// Before the IMU bootloader jump.
    BeforeImuJump,
}

/// Prepare (erase) command of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareStep {
    /// Command type tag.
    pub packet_type: PacketType,
    /// Core id character.
    pub core: u8,
}

/// A hook step a device profile can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStep {
    /// Sleep for a configured wait.
    Sleep(Settle),
    /// Repeat the handshake with the re-handshake budget.
    Reshake,
    /// Re-handshake after the bootloader jump and record the bootloader version.
    ConfirmBootloader,
    /// Reset the IMU.
    ResetImu,
    /// Switch the serial line to the bootloader rate.
    BootloaderBaud(u32),
    /// Restore the serial rate used before [`HookStep::BootloaderBaud`].
    ApplicationBaud,
    /// Ping until the unit answers again.
    PingUntilFound,
    /// Send the prepare command.
    Prepare(PrepareStep),
}

impl HookStep {
    /// Run the step.
    pub fn run(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        let settle = &ctx.session.policy.settle;
        match *self {
            Self::Sleep(which) => {
                let wait = match which {
                    Settle::FirstPacketMain => settle.first_packet_main,
                    Settle::FirstPacketImu => settle.first_packet_imu,
                    Settle::FirstPacketBeidouImu => settle.first_packet_beidou_imu,
                    Settle::BeforeImuJump => settle.before_imu_jump,
                };
                debug!("{}: waiting {wait:?}", ctx.key);
                thread::sleep(wait);
                Ok(())
            },
            Self::Reshake => {
                let discovery = &ctx.session.policy.discovery;
                reshake(
                    &mut *ctx.link,
                    discovery.reshake_attempts,
                    discovery.reshake_interval,
                )
            },
            Self::ConfirmBootloader => confirm_bootloader(ctx),
            Self::ResetImu => {
                let repeats = settle.imu_reset_repeats;
                let interval = settle.imu_reset_interval;
                for _ in 0..repeats {
                    ctx.link.send_command(&Command::new(RESET_IMU))?;
                    thread::sleep(interval);
                }
                info!("IMU reset sent");
                Ok(())
            },
            Self::BootloaderBaud(rate) => {
                if ctx.link.kind() != TransportKind::Serial {
                    return Ok(());
                }
                if ctx.session.application_baud.is_none() {
                    ctx.session.application_baud = ctx.link.baud_rate();
                }
                debug!("Switching {} to {rate} baud", ctx.link.name());
                ctx.link.set_baud_rate(rate)
            },
            Self::ApplicationBaud => match ctx.session.application_baud {
                Some(rate) if ctx.link.kind() == TransportKind::Serial => {
                    debug!("Restoring {} to {rate} baud", ctx.link.name());
                    ctx.link.set_baud_rate(rate)
                },
                _ => Ok(()),
            },
            Self::PingUntilFound => ping_until_found(ctx),
            Self::Prepare(step) => prepare(ctx, step),
        }
    }
}

fn confirm_bootloader(ctx: &mut HookContext<'_>) -> Result<()> {
    let policy = &ctx.session.policy;
    let wait = policy.settle.after_bootloader_jump;
    let pings = policy.settle.bootloader_pings;
    let discovery = policy.discovery.clone();

    thread::sleep(wait);
    reshake(
        &mut *ctx.link,
        discovery.reshake_attempts,
        discovery.reshake_interval,
    )?;
    thread::sleep(wait);

    let read = discovery.ping_read_for(ctx.link.kind());
    let broadcast = ctx.link.kind() == TransportKind::Ethernet;
    for attempt in 1..=pings.max(1) {
        let Some(text) = identify(&mut *ctx.link, broadcast, discovery.ping_settle, read)? else {
            debug!("Bootloader ping {attempt} unanswered");
            continue;
        };
        if !text.contains("SN:") {
            debug!("Unit still reports application mode: {text}");
            continue;
        }
        let version = text
            .split_whitespace()
            .nth(2)
            .map(|w| w.trim_start_matches(['v', 'V']).to_string());
        info!(
            "Bootloader confirmed (version {})",
            version.as_deref().unwrap_or("unknown")
        );
        let identity = &mut ctx.session.identity;
        if version.is_some() {
            identity.bootloader_version = version;
        }
        identity.mode = Some(DeviceMode::Bootloader);
        return Ok(());
    }
    Err(Error::DeviceNotFound)
}

fn ping_until_found(ctx: &mut HookContext<'_>) -> Result<()> {
    let profile = ctx.session.profile;
    let discovery = ctx.session.policy.discovery.clone();
    let targets = [profile.ping_target()];
    for attempt in 1..=discovery.reshake_attempts.max(1) {
        if crate::is_interrupted_requested() {
            return Err(Error::Stopped);
        }
        if let Some((_, info)) = discovery::ping(&mut *ctx.link, &targets, &discovery)? {
            info!("{} is back in {} mode", info.device_type, info.mode);
            let identity = DeviceIdentity::parse(&info, profile.layout);
            ctx.session.identity = identity;
            return Ok(());
        }
        debug!("Unit not answering yet (attempt {attempt})");
        thread::sleep(discovery.reshake_interval);
    }
    Err(Error::DeviceNotFound)
}

#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
fn prepare(ctx: &mut HookContext<'_>, step: PrepareStep) -> Result<()> {
    let kind = ctx.link.kind();
    let len = u32::try_from(ctx.section_len)
        .map_err(|_| Error::InvalidImage(format!("{} section exceeds 4 GiB", ctx.key)))?;

    let mut payload = vec![b'C', step.core];
    payload.write_u32::<BigEndian>(len).unwrap();
    if kind == TransportKind::Ethernet
        && ctx
            .session
            .identity
            .bootloader_at_least(NAMED_PREPARE_BOOTLOADER)
    {
        payload.extend_from_slice(ctx.key.as_bytes());
    }
    let command = Command::new(step.packet_type).with_payload(payload);

    let policy = match kind {
        TransportKind::Ethernet => ctx.session.policy.prepare_ethernet.clone(),
        TransportKind::Serial => ctx.session.policy.prepare_uart.clone(),
    };

    info!("Preparing {} ({len} bytes)", ctx.key);
    ctx.link.reset_buffer()?;

    if kind == TransportKind::Ethernet && !ctx.ack {
        for _ in 0..policy.no_ack_repeats.max(1) {
            ctx.link.send_command(&command)?;
        }
        thread::sleep(policy.no_ack_settle);
        return Ok(());
    }

    for attempt in 1..=policy.attempts.max(1) {
        if crate::is_interrupted_requested() {
            return Err(Error::Stopped);
        }
        thread::sleep(policy.pre_send);
        if let Err(e) = ctx.link.send_command(&command) {
            warn!("Prepare {} not sent: {e}", ctx.key);
            continue;
        }
        thread::sleep(policy.post_send);
        match wait_for(&mut *ctx.link, command.reply, &policy.read) {
            Ok(_) => {
                debug!("Prepare {} acknowledged (attempt {attempt})", ctx.key);
                return Ok(());
            },
            Err(e) => debug!("Prepare {} attempt {attempt} failed: {e}", ctx.key),
        }
    }
    Err(Error::Timeout(format!(
        "prepare {} not acknowledged",
        ctx.key
    )))
}

/// A host-supplied hook.
pub type Hook = Box<dyn FnMut(&mut HookContext<'_>) -> Result<()> + Send>;

enum Action {
    Step(HookStep),
    Custom(Hook),
}

/// Hooks of one worker, run in registration order per point.
#[derive(Default)]
pub struct Hooks {
    entries: Vec<(HookPoint, Action)>,
}

impl Hooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach profile steps at `point`.
    pub fn steps(&mut self, point: HookPoint, steps: &[HookStep]) -> &mut Self {
        self.entries
            .extend(steps.iter().map(|step| (point, Action::Step(*step))));
        self
    }

    /// Attach a closure at `point`.
    pub fn on<F>(&mut self, point: HookPoint, hook: F) -> &mut Self
    where
        F: FnMut(&mut HookContext<'_>) -> Result<()> + Send + 'static,
    {
        self.entries.push((point, Action::Custom(Box::new(hook))));
        self
    }

    /// Steps attached at `point`, closures excluded.
    pub fn steps_at(&self, point: HookPoint) -> Vec<HookStep> {
        self.entries
            .iter()
            .filter_map(|(p, action)| match action {
                Action::Step(step) if *p == point => Some(*step),
                _ => None,
            })
            .collect()
    }

    /// Run everything attached at `point`, stopping at the first failure.
    pub fn fire(&mut self, point: HookPoint, ctx: &mut HookContext<'_>) -> Result<()> {
        for (p, action) in &mut self.entries {
            if *p != point {
                continue;
            }
            match action {
                Action::Step(step) => step.run(ctx)?,
                Action::Custom(hook) => hook(ctx)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(point, action)| match action {
                Action::Step(step) => format!("{point}: {step:?}"),
                Action::Custom(_) => format!("{point}: <custom>"),
            }))
            .finish()
    }
}
