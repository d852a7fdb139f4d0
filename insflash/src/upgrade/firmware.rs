//! Block-by-block firmware write.

use std::thread;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::image::{SECTION_ALIGN, pad_to};
use crate::protocol::request::wait_for;
use crate::protocol::{Command, PacketType};
use crate::transport::{Communicator, LinkDialect};
use crate::upgrade::hooks::{HookContext, HookPoint, Hooks};
use crate::upgrade::policy::WritePolicy;
use crate::upgrade::{SessionState, StopHandle, UpgradeEvent, UpgradeGroup};

/// Width of the block length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// One byte (serial units and the IMU).
    U8,
    /// Big-endian u32 (Ethernet main cores).
    U32,
}

/// How blocks of one target are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFormat {
    /// Write command tag.
    pub packet_type: PacketType,
    /// Acknowledgement tag.
    pub reply: PacketType,
    /// Width of the length field.
    pub length: LengthField,
    /// Dialect pinned for these frames, if any.
    pub dialect: Option<LinkDialect>,
}

impl BlockFormat {
    /// Write command for `data` at `offset`: `offset BE u32 | len | data`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn command(&self, offset: usize, data: &[u8]) -> Result<Command> {
        let offset = u32::try_from(offset)
            .map_err(|_| Error::Protocol(format!("block offset {offset} exceeds u32")))?;
        let mut payload = Vec::with_capacity(data.len() + 8);
        payload.write_u32::<BigEndian>(offset).unwrap();
        match self.length {
            LengthField::U8 => {
                let len = u8::try_from(data.len()).map_err(|_| {
                    Error::Protocol(format!("{} byte block needs a wider length", data.len()))
                })?;
                payload.push(len);
            },
            LengthField::U32 => {
                let len = u32::try_from(data.len())
                    .map_err(|_| Error::Protocol("block exceeds u32".to_string()))?;
                payload.write_u32::<BigEndian>(len).unwrap();
            },
        }
        payload.extend_from_slice(data);

        let mut command = Command::new(self.packet_type)
            .with_payload(payload)
            .with_reply(self.reply);
        if let Some(dialect) = self.dialect {
            command = command.with_dialect(dialect);
        }
        Ok(command)
    }
}

/// Block size rule of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    /// Always this many bytes.
    Fixed(usize),
    /// Depends on the dialect the link negotiated.
    ByDialect {
        /// With length-as-protocol framing.
        length: usize,
        /// With zero-length framing.
        zero: usize,
    },
}

impl BlockSize {
    /// Block size on a link with `dialect`. Links without one use `length`.
    pub fn resolve(self, dialect: Option<LinkDialect>) -> usize {
        match self {
            Self::Fixed(size) => size,
            Self::ByDialect { length, zero } => match dialect {
                Some(d) if !d.use_length_as_protocol => zero,
                _ => length,
            },
        }
    }
}

/// Writes one section into the unit's bootloader.
#[derive(Debug)]
pub struct FirmwareWriteWorker {
    name: String,
    key: String,
    group: UpgradeGroup,
    content: Vec<u8>,
    section_len: usize,
    ack: bool,
    block_size: usize,
    format: BlockFormat,
    policy: WritePolicy,
    hooks: Hooks,
    stop: StopHandle,
}

impl FirmwareWriteWorker {
    /// Worker writing `section`, padded with zeros to the section alignment.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        group: UpgradeGroup,
        section: &[u8],
        ack: bool,
        block_size: usize,
        format: BlockFormat,
        policy: WritePolicy,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            group,
            content: pad_to(section, SECTION_ALIGN, 0x00),
            section_len: section.len(),
            ack,
            block_size: block_size.max(1),
            format,
            policy,
            hooks: Hooks::new(),
            stop: StopHandle::new(),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker key: the target name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Jump group.
    pub fn group(&self) -> UpgradeGroup {
        self.group
    }

    /// Bytes that will be written.
    pub fn content_size(&self) -> usize {
        self.content.len()
    }

    /// Whether blocks are acknowledged.
    pub fn ack(&self) -> bool {
        self.ack
    }

    /// Block size in use.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Block framing.
    pub fn format(&self) -> &BlockFormat {
        &self.format
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

    /// Request a stop before the next block.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Write every block in order.
    pub fn run(
        &mut self,
        link: &mut dyn Communicator,
        session: &mut SessionState,
        events: &mut dyn FnMut(&UpgradeEvent),
    ) -> Result<()> {
        let total = self.content.len();
        if total == 0 {
            return Err(self.abort(events, "no content to write".to_string()));
        }
        self.check_stopped()?;

        events(&UpgradeEvent::BeforeWrite {
            key: self.key.clone(),
        });
        self.fire(HookPoint::BeforeWrite, link, session, events)?;
        link.reset_buffer()?;

        info!(
            "Writing {} ({total} bytes, {} byte blocks, ack {})",
            self.name,
            self.block_size,
            if self.ack { "on" } else { "off" }
        );

        let mut offset = 0;
        while offset < total {
            self.check_stopped()?;
            let len = self.block_size.min(total - offset);
            let command = self
                .format
                .command(offset, &self.content[offset..offset + len])?;

            if self.ack {
                let attempts = if offset == 0 {
                    self.policy.first_block_attempts(total)
                } else {
                    self.policy.block_attempts
                };
                let mut acknowledged = false;
                for attempt in 1..=attempts.max(1) {
                    if self.write_block(link, session, events, &command, offset, attempt)? {
                        acknowledged = true;
                        break;
                    }
                    debug!(
                        "{}: block at 0x{offset:08X} attempt {attempt}/{attempts} unacknowledged",
                        self.key
                    );
                }
                if !acknowledged {
                    return Err(self.abort(
                        events,
                        format!("block at offset {offset} not acknowledged"),
                    ));
                }
            } else if offset == 0 {
                self.write_block(link, session, events, &command, offset, 1)?;
                thread::sleep(self.policy.no_ack_erase_wait(total));
            } else {
                for attempt in 1..=self.policy.no_ack_repeats.max(1) {
                    self.write_block(link, session, events, &command, offset, attempt)?;
                }
                thread::sleep(self.policy.no_ack_interval);
            }

            offset += len;
            events(&UpgradeEvent::Progress {
                key: self.key.clone(),
                offset,
                total,
            });
        }

        events(&UpgradeEvent::AfterWrite {
            key: self.key.clone(),
        });
        self.fire(HookPoint::AfterWrite, link, session, events)?;
        info!("{} written", self.name);
        events(&UpgradeEvent::Finish {
            key: self.key.clone(),
        });
        Ok(())
    }

    /// Send one block. The first block also settles the erase. Returns
    /// whether the block was acknowledged (always true without ACK).
    fn write_block(
        &mut self,
        link: &mut dyn Communicator,
        session: &mut SessionState,
        events: &mut dyn FnMut(&UpgradeEvent),
        command: &Command,
        offset: usize,
        attempt: u32,
    ) -> Result<bool> {
        if let Err(e) = link.send_command(command) {
            warn!("{}: block at 0x{offset:08X} not sent: {e}", self.key);
            return Ok(false);
        }

        if offset == 0 {
            if attempt == 1 {
                events(&UpgradeEvent::FirstPacket {
                    key: self.key.clone(),
                });
                self.fire(HookPoint::FirstPacket, link, session, events)?;
            }
            thread::sleep(self.policy.first_block_settle);
        }

        if !self.ack {
            return Ok(true);
        }
        Ok(wait_for(link, command.reply, &self.policy.ack_read).is_ok())
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
            section_len: self.section_len,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crate::discovery::DeviceIdentity;
    use crate::protocol::Framing;
    use crate::protocol::packet::encode_body;
    use crate::testing::MockLink;
    use crate::upgrade::UpgradePolicy;

    const WRITE: PacketType = PacketType::new(0x03, 0xAA);

    const MAIN: BlockFormat = BlockFormat {
        packet_type: WRITE,
        reply: WRITE,
        length: LengthField::U32,
        dialect: None,
    };

    fn session() -> SessionState {
        SessionState::new(
            DeviceKind::Ins401.profile(),
            DeviceIdentity::default(),
            UpgradePolicy::instant(),
        )
    }

    fn worker(content: &[u8], ack: bool, block: usize) -> FirmwareWriteWorker {
        FirmwareWriteWorker::new(
            "MAIN_INS",
            "ins",
            UpgradeGroup::Main,
            content,
            ack,
            block,
            MAIN,
            WritePolicy::instant(),
        )
    }

    fn ack_link() -> MockLink {
        MockLink::ethernet()
            .respond_with(|cmd| vec![encode_body(Framing::Ethernet, cmd.packet_type, &[])])
    }

    #[test]
    fn test_block_command_layout() {
        let cmd = MAIN.command(0x0102, &[0xAA, 0xBB]).unwrap();
        assert_eq!(cmd.payload, [0, 0, 1, 2, 0, 0, 0, 2, 0xAA, 0xBB]);

        let imu = BlockFormat {
            packet_type: PacketType::new(0x41, 0x57),
            reply: PacketType::new(0x57, 0x41),
            length: LengthField::U8,
            dialect: Some(LinkDialect::LENGTH_AS_PROTOCOL),
        };
        let cmd = imu.command(192, &[1; 3]).unwrap();
        assert_eq!(cmd.payload, [0, 0, 0, 192, 3, 1, 1, 1]);
        assert_eq!(cmd.reply, PacketType::new(0x57, 0x41));
        assert_eq!(cmd.dialect, Some(LinkDialect::LENGTH_AS_PROTOCOL));
        assert!(imu.command(0, &[0; 256]).is_err());
    }

    #[test]
    fn test_block_size_by_dialect() {
        let rule = BlockSize::ByDialect {
            length: 960,
            zero: 192,
        };
        assert_eq!(rule.resolve(Some(LinkDialect::LENGTH_AS_PROTOCOL)), 960);
        assert_eq!(rule.resolve(Some(LinkDialect::ZERO_LENGTH)), 192);
        assert_eq!(rule.resolve(None), 960);
        assert_eq!(BlockSize::Fixed(192).resolve(Some(LinkDialect::ZERO_LENGTH)), 192);
    }

    #[test]
    fn test_unacknowledged_write_progress() {
        let content = vec![0x5A; 300_000];
        let mut w = worker(&content, false, 192);
        let mut link = MockLink::ethernet();
        let mut session = session();
        let mut events = Vec::new();
        w.run(&mut link, &mut session, &mut |e| events.push(e.clone()))
            .unwrap();

        let offsets: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                UpgradeEvent::Progress { offset, total, .. } => {
                    assert_eq!(*total, 300_000);
                    Some(*offset)
                },
                _ => None,
            })
            .collect();
        assert_eq!(offsets.len(), 300_000_usize.div_ceil(192));
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(offsets.last(), Some(&300_000));
        assert!(matches!(events.last(), Some(UpgradeEvent::Finish { .. })));
        assert!(matches!(events[0], UpgradeEvent::BeforeWrite { .. }));
        assert!(matches!(events[1], UpgradeEvent::FirstPacket { .. }));
        // First block once, every later block three times.
        assert_eq!(link.sent().len(), 1 + (offsets.len() - 1) * 3);
        assert_eq!(link.reads(), 0);
    }

    #[test]
    fn test_final_block_is_remainder() {
        let mut w = worker(&[1; 400], true, 192);
        let mut link = ack_link();
        let mut session = session();
        w.run(&mut link, &mut session, &mut |_| {}).unwrap();
        let lens: Vec<usize> = link.sent().iter().map(|p| p.payload.len() - 8).collect();
        assert_eq!(lens, [192, 192, 16]);
        let last = &link.sent()[2].payload;
        assert_eq!(&last[..4], &384u32.to_be_bytes());
    }

    #[test]
    fn test_content_padded_with_zeros() {
        let w = worker(&[0xFF; 20], true, 192);
        assert_eq!(w.content_size(), 32);
        assert!(w.content[20..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_content_aborts() {
        let mut w = worker(&[], true, 192);
        let mut link = ack_link();
        let mut events = Vec::new();
        let result = w.run(&mut link, &mut session(), &mut |e| events.push(e.clone()));
        assert!(matches!(result, Err(Error::UpgradeAborted { .. })));
        assert!(matches!(events[..], [UpgradeEvent::Error { .. }]));
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_missing_ack_aborts_after_retries() {
        let mut link = MockLink::ethernet().respond_with(|cmd| {
            let offset = u32::from_be_bytes([
                cmd.payload[0],
                cmd.payload[1],
                cmd.payload[2],
                cmd.payload[3],
            ]);
            if offset == 0 {
                vec![encode_body(Framing::Ethernet, cmd.packet_type, &[])]
            } else {
                Vec::new()
            }
        });
        let mut w = worker(&[2; 384], true, 192);
        let mut events = Vec::new();
        let result = w.run(&mut link, &mut session(), &mut |e| events.push(e.clone()));
        assert!(matches!(result, Err(Error::UpgradeAborted { ref key, .. }) if key == "ins"));
        // One acknowledged first block, then three attempts at the second.
        assert_eq!(link.sent().len(), 4);
        assert!(matches!(events.last(), Some(UpgradeEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, UpgradeEvent::Finish { .. })));
    }

    #[test]
    fn test_stop_before_next_block() {
        let mut w = worker(&[3; 384], false, 192);
        let handle = w.stop_handle();
        let mut link = MockLink::ethernet();
        let result = w.run(&mut link, &mut session(), &mut |e| {
            if matches!(e, UpgradeEvent::Progress { .. }) {
                handle.stop();
            }
        });
        assert!(matches!(result, Err(Error::Stopped)));
        assert_eq!(link.sent().len(), 1);
    }

    #[test]
    fn test_hook_failure_aborts() {
        let mut w = worker(&[4; 16], true, 192);
        w.hooks_mut().on(HookPoint::BeforeWrite, |_| {
            Err(Error::Timeout("prepare".into()))
        });
        let mut link = ack_link();
        let result = w.run(&mut link, &mut session(), &mut |_| {});
        assert!(matches!(result, Err(Error::UpgradeAborted { ref reason, .. }) if reason.contains("before-write")));
        assert!(link.sent().is_empty());
    }
}
