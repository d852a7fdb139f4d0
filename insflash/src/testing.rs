//! In-memory links for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ethernet::{self, MacAddr, parse_link_frame};
use crate::protocol::packet::{Decoded, Framing, Packet, PacketType, decode, encode_body};
use crate::protocol::Command;
use crate::transport::{Communicator, FrameReceiver, FrameSender, LinkDialect, TransportKind};

type Responder = Box<dyn FnMut(&Packet) -> Vec<Vec<u8>> + Send>;

/// Route `log` output through the test harness; `RUST_LOG=debug` shows it.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scripted communicator. Every sent frame is decoded and handed to the
/// responder; whatever it returns is queued as future reads.
pub(crate) struct MockLink {
    kind: TransportKind,
    responder: Option<Responder>,
    inbox: VecDeque<Vec<u8>>,
    sent: Vec<Packet>,
    sent_commands: Vec<Command>,
    reads: usize,
    resets: usize,
    handshakes: usize,
    fail_reads: bool,
    fail_sends: bool,
    fail_handshake: bool,
    upgrading: bool,
    baud_rates: Vec<u32>,
    dialect: Option<LinkDialect>,
}

impl MockLink {
    fn with_kind(kind: TransportKind) -> Self {
        Self {
            kind,
            responder: None,
            inbox: VecDeque::new(),
            sent: Vec::new(),
            sent_commands: Vec::new(),
            reads: 0,
            resets: 0,
            handshakes: 0,
            fail_reads: false,
            fail_sends: false,
            fail_handshake: false,
            upgrading: false,
            baud_rates: Vec::new(),
            dialect: None,
        }
    }

    pub(crate) fn uart() -> Self {
        Self::with_kind(TransportKind::Serial)
    }

    pub(crate) fn ethernet() -> Self {
        Self::with_kind(TransportKind::Ethernet)
    }

    pub(crate) fn respond_with(
        mut self,
        responder: impl FnMut(&Packet) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub(crate) fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn fail_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub(crate) fn fail_handshake(mut self) -> Self {
        self.fail_handshake = true;
        self
    }

    pub(crate) fn push_read(&mut self, bytes: Vec<u8>) {
        self.inbox.push_back(bytes);
    }

    /// Frame `payload` the way this link's peer would.
    pub(crate) fn frame(&self, packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
        encode_body(self.kind.framing(), packet_type, payload)
    }

    pub(crate) fn sent(&self) -> &[Packet] {
        &self.sent
    }

    pub(crate) fn sent_commands(&self) -> &[Command] {
        &self.sent_commands
    }

    pub(crate) fn sent_types(&self) -> Vec<PacketType> {
        self.sent.iter().map(|p| p.packet_type).collect()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets
    }

    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes
    }

    pub(crate) fn is_upgrading(&self) -> bool {
        self.upgrading
    }

    pub(crate) fn baud_rates(&self) -> &[u32] {
        &self.baud_rates
    }
}

impl Communicator for MockLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "mock")));
        }
        let Some(Decoded::Packet { packet, .. }) = decode(self.kind.framing(), bytes) else {
            return Err(Error::Protocol("mock link got an undecodable frame".into()));
        };
        if let Some(responder) = self.responder.as_mut() {
            self.inbox.extend(responder(&packet));
        }
        self.sent.push(packet);
        Ok(())
    }

    fn read(&mut self, _max_wait: Duration) -> Result<Option<Vec<u8>>> {
        self.reads += 1;
        if self.fail_reads {
            return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "mock")));
        }
        Ok(self.inbox.pop_front())
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.resets += 1;
        self.inbox.clear();
        Ok(())
    }

    fn can_write(&self) -> bool {
        true
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        Ok(encode_body(
            self.kind.framing(),
            command.packet_type,
            &command.payload,
        ))
    }

    fn send_command(&mut self, command: &Command) -> Result<()> {
        self.sent_commands.push(command.clone());
        let frame = self.encode(command)?;
        self.send(&frame)
    }

    fn handshake(&mut self) -> Result<()> {
        self.handshakes += 1;
        if self.fail_handshake {
            return Err(Error::DeviceNotFound);
        }
        if self.kind == TransportKind::Ethernet {
            self.dialect = Some(LinkDialect::LENGTH_AS_PROTOCOL);
        }
        Ok(())
    }

    fn dialect(&self) -> Option<LinkDialect> {
        self.dialect
    }

    fn set_upgrading(&mut self, upgrading: bool) {
        self.upgrading = upgrading;
    }

    fn baud_rate(&self) -> Option<u32> {
        match self.kind {
            TransportKind::Serial => Some(self.baud_rates.last().copied().unwrap_or(460800)),
            TransportKind::Ethernet => None,
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if self.kind != TransportKind::Serial {
            return Err(Error::Unsupported("mock ethernet link".into()));
        }
        self.baud_rates.push(baud_rate);
        Ok(())
    }
}

/// In-memory serial port.
pub(crate) struct MockPort {
    name: String,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    baud_rate: u32,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rx: VecDeque::new(),
            tx: Vec::new(),
            baud_rate: 460800,
            timeout: Duration::from_millis(100),
        }
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.tx.clone()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A unit on a simulated wire. It answers identification probes sent in its
/// own dialect and echoes every other command with an empty reply.
pub(crate) struct SimulatedUnit {
    mac: MacAddr,
    dialect: Option<LinkDialect>,
    info: Vec<u8>,
}

impl SimulatedUnit {
    pub(crate) fn new(mac: MacAddr, dialect: LinkDialect) -> Self {
        Self {
            mac,
            dialect: Some(dialect),
            info: b"INS401 5020-3021-01 2209000123 v1.0 hardware:v3.0".to_vec(),
        }
    }

    pub(crate) fn silent(mac: MacAddr) -> Self {
        Self {
            mac,
            dialect: None,
            info: Vec::new(),
        }
    }

    fn answer(&self, host: MacAddr, raw: &[u8]) -> Option<Vec<u8>> {
        let dialect = self.dialect?;
        let link = parse_link_frame(raw)?;
        if !(link.dst.is_broadcast() || link.dst == self.mac) {
            return None;
        }
        if (link.length_field != 0) != dialect.use_length_as_protocol {
            return None;
        }
        let Some(Decoded::Packet { packet, .. }) = decode(Framing::Ethernet, link.body) else {
            return None;
        };
        let payload = if packet.packet_type == PacketType::new(0x01, 0xCC) {
            self.info.clone()
        } else {
            Vec::new()
        };
        Some(ethernet::encode(
            host,
            self.mac,
            packet.packet_type,
            &payload,
            dialect,
        ))
    }
}

struct SimulatedSender {
    host: MacAddr,
    unit: SimulatedUnit,
    wire: Sender<Vec<u8>>,
}

impl FrameSender for SimulatedSender {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(reply) = self.unit.answer(self.host, frame) {
            self.wire
                .send(reply)
                .map_err(|_| Error::Io(io::Error::other("wire closed")))?;
        }
        Ok(())
    }
}

struct SimulatedReceiver {
    wire: Receiver<Vec<u8>>,
}

impl FrameReceiver for SimulatedReceiver {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.wire.recv_timeout(Duration::from_millis(5)) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Io(io::Error::other("wire closed")))
            },
        }
    }
}

/// Frame halves connecting a host at `host` to `unit`.
pub(crate) fn simulated_link(
    host: MacAddr,
    unit: SimulatedUnit,
) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        Box::new(SimulatedSender {
            host,
            unit,
            wire: tx,
        }),
        Box::new(SimulatedReceiver { wire: rx }),
    )
}
