//! Mode transitions between bootloader and application.

use std::thread;

use log::{debug, error, info, warn};

use crate::discovery::NAMED_PREPARE_BOOTLOADER;
use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::protocol::request::wait_for;
use crate::transport::Communicator;
use crate::upgrade::hooks::{HookContext, HookPoint, Hooks};
use crate::upgrade::policy::JumpPolicy;
use crate::upgrade::{SessionState, StopHandle, UpgradeEvent, UpgradeGroup};

/// Which context the jump enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpDirection {
    /// Enter the bootloader.
    ToBootloader,
    /// Start the application.
    ToApplication,
}

impl JumpDirection {
    /// Lowercase target context name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToBootloader => "bootloader",
            Self::ToApplication => "application",
        }
    }
}

/// Sends one jump command, verified when the unit acknowledges.
#[derive(Debug)]
pub struct JumpWorker {
    name: String,
    key: String,
    group: UpgradeGroup,
    direction: JumpDirection,
    command: Command,
    section_crcs: Option<Vec<u8>>,
    ack: bool,
    attempts: u32,
    round_size: Option<u32>,
    policy: JumpPolicy,
    hooks: Hooks,
    stop: StopHandle,
}

impl JumpWorker {
    /// Jump with `command`, retried up to `attempts` times when `ack` is set.
    pub fn new(
        name: impl Into<String>,
        group: UpgradeGroup,
        direction: JumpDirection,
        command: Command,
        ack: bool,
        attempts: u32,
        policy: JumpPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            key: format!("{}_jump_{}", group.as_str(), direction.as_str()),
            group,
            direction,
            command,
            section_crcs: None,
            ack,
            attempts: attempts.max(1),
            round_size: None,
            policy,
            hooks: Hooks::new(),
            stop: StopHandle::new(),
        }
    }

    /// Carry section CRCs as payload when the bootloader understands them.
    #[must_use]
    pub fn with_section_crcs(mut self, crcs: Vec<u8>) -> Self {
        self.section_crcs = Some(crcs);
        self
    }

    /// Split the attempts into rounds of `round_size`, running the
    /// [`HookPoint::BetweenRounds`] hooks after each unanswered round.
    #[must_use]
    pub fn with_rounds(mut self, round_size: u32) -> Self {
        self.round_size = Some(round_size.max(1));
        self
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker key, e.g. `main_jump_bootloader`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Jump group.
    pub fn group(&self) -> UpgradeGroup {
        self.group
    }

    /// Target context.
    pub fn direction(&self) -> JumpDirection {
        self.direction
    }

    /// Command sent, before any CRC payload is attached.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Whether the jump is verified.
    pub fn ack(&self) -> bool {
        self.ack
    }

    /// Attempts when verified.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Hooks, for attaching more.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Hooks attached so far.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Stop flag of this worker.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Share a session-wide stop flag.
    pub fn set_stop_handle(&mut self, stop: StopHandle) {
        self.stop = stop;
    }

    /// Request a stop before the next attempt.
    pub fn stop(&self) {
        self.stop.stop();
    }

    fn command_for(&self, session: &SessionState) -> Command {
        match &self.section_crcs {
            Some(crcs)
                if session
                    .identity
                    .bootloader_at_least(NAMED_PREPARE_BOOTLOADER) =>
            {
                self.command.clone().with_payload(crcs.clone())
            },
            _ => self.command.clone(),
        }
    }

    /// Send the jump and run its hooks.
    pub fn run(
        &mut self,
        link: &mut dyn Communicator,
        session: &mut SessionState,
        events: &mut dyn FnMut(&UpgradeEvent),
    ) -> Result<()> {
        self.check_stopped()?;
        events(&UpgradeEvent::BeforeCommand {
            key: self.key.clone(),
        });
        self.fire(HookPoint::BeforeCommand, link, session, events)?;
        link.reset_buffer()?;

        let command = self.command_for(session);
        info!(
            "Jumping to {} ({} {})",
            self.direction.as_str(),
            self.name,
            command.packet_type
        );

        if self.ack {
            let mut acknowledged = false;
            for attempt in 1..=self.attempts {
                self.check_stopped()?;
                if let Err(e) = link.send_command(&command) {
                    warn!("{}: jump not sent: {e}", self.key);
                } else {
                    thread::sleep(self.policy.attempt_interval);
                    match wait_for(link, command.reply, &self.policy.read) {
                        Ok(_) => {
                            acknowledged = true;
                            break;
                        },
                        Err(e) => debug!(
                            "{}: attempt {attempt}/{} failed: {e}",
                            self.key, self.attempts
                        ),
                    }
                }
                if self.round_ends(attempt) {
                    self.recover(link, session)?;
                }
            }
            if !acknowledged {
                return Err(self.abort(
                    events,
                    format!(
                        "jump to {} not acknowledged after {} attempts",
                        self.direction.as_str(),
                        self.attempts
                    ),
                ));
            }
        } else {
            if let Err(e) = link.send_command(&command) {
                return Err(self.abort(events, format!("jump not sent: {e}")));
            }
            thread::sleep(self.policy.no_ack_settle);
        }

        events(&UpgradeEvent::AfterCommand {
            key: self.key.clone(),
        });
        self.fire(HookPoint::AfterCommand, link, session, events)?;
        events(&UpgradeEvent::Finish {
            key: self.key.clone(),
        });
        Ok(())
    }

    fn fire(
        &mut self,
        point: HookPoint,
        link: &mut dyn Communicator,
        session: &mut SessionState,
        events: &mut dyn FnMut(&UpgradeEvent),
    ) -> Result<()> {
        let mut ctx = HookContext {
            link,
            session,
            key: &self.key,
            section_len: 0,
            ack: self.ack,
        };
        match self.hooks.fire(point, &mut ctx) {
            Ok(()) => Ok(()),
            Err(Error::Stopped) => Err(Error::Stopped),
            Err(e) => {
                let reason = format!("{point} step failed: {e}");
                Err(self.abort(events, reason))
            },
        }
    }

    /// Whether `attempt` closes a round that more attempts follow.
    fn round_ends(&self, attempt: u32) -> bool {
        self.round_size
            .is_some_and(|size| attempt % size == 0 && attempt < self.attempts)
    }

    /// Run the between-rounds hooks.
    /// Failures are logged and the next round still runs.
    fn recover(&mut self, link: &mut dyn Communicator, session: &mut SessionState) -> Result<()> {
        info!("{}: no reply this round, recovering", self.key);
        let mut ctx = HookContext {
            link,
            session,
            key: &self.key,
            section_len: 0,
            ack: self.ack,
        };
        match self.hooks.fire(HookPoint::BetweenRounds, &mut ctx) {
            Err(Error::Stopped) => Err(Error::Stopped),
            Err(e) => {
                warn!("{}: recovery failed: {e}", self.key);
                Ok(())
            },
            Ok(()) => Ok(()),
        }
    }

    fn check_stopped(&self) -> Result<()> {
        if self.stop.is_stopped() {
            info!("{} stopped", self.name);
            return Err(Error::Stopped);
        }
        Ok(())
    }

    fn abort(&self, events: &mut dyn FnMut(&UpgradeEvent), reason: String) -> Error {
        error!("{} failed: {reason}", self.name);
        events(&UpgradeEvent::Error {
            key: self.key.clone(),
            reason: reason.clone(),
        });
        Error::UpgradeAborted {
            key: self.key.clone(),
            reason,
        }
    }
}
