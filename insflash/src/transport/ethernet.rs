//! Raw Ethernet communicator.
//!
//! A capture thread filters inbound link frames and pushes their packet
//! bodies into a bounded FIFO. Protocol code only ever polls that FIFO, so a
//! slow consumer never stalls capture; on overflow the oldest entry goes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{Level, debug, error, info, log_enabled, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::protocol::ethernet::{self, MacAddr, parse_link_frame};
use crate::protocol::{Command, Framing, PacketType};
use crate::transport::serial::hex;
use crate::transport::{Communicator, LinkDialect, TransportKind};

/// Identification command and reply tag.
pub const IDENTIFY: PacketType = PacketType::new(0x01, 0xCC);

/// Reply tags kept while an upgrade session is running.
pub const UPGRADE_PACKETS: &[PacketType] = &[
    PacketType::new(0x01, 0xCC),
    PacketType::new(0x01, 0xAA),
    PacketType::new(0x02, 0xAA),
    PacketType::new(0x03, 0xAA),
    PacketType::new(0x04, 0xAA),
    PacketType::new(0x05, 0xAA),
    PacketType::new(0x06, 0xAA),
    PacketType::new(0x07, 0xAA),
    PacketType::new(0x08, 0xAA),
    PacketType::new(0x4A, 0x49),
    PacketType::new(0x4A, 0x41),
    PacketType::new(0x57, 0x41),
    PacketType::new(0x0A, 0xAA),
];

/// Outbound half of a raw link.
pub trait FrameSender: Send {
    /// Transmit one complete link-layer frame.
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// Inbound half of a raw link.
pub trait FrameReceiver: Send {
    /// Next raw frame, or `None` when the receive timeout elapsed.
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Ethernet link settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EthernetConfig {
    /// Cached frames kept before the oldest is dropped.
    pub cache_capacity: usize,
    /// Quiet time between clearing the cache and sending a probe.
    pub probe_settle: Duration,
    /// How long a probe listens for the identification reply.
    pub probe_window: Duration,
    /// Receive timeout of the capture thread; bounds shutdown latency.
    pub capture_timeout: Duration,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 20000,
            probe_settle: Duration::from_millis(100),
            probe_window: Duration::from_millis(100),
            capture_timeout: Duration::from_millis(100),
        }
    }
}

/// A filtered inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Sender address.
    pub src: MacAddr,
    /// Raw frame length field.
    pub length_field: u16,
    /// Packet body from the sync marker on, padding included.
    pub body: Vec<u8>,
}

impl CapturedFrame {
    /// Type tag of the body.
    pub fn packet_type(&self) -> Option<PacketType> {
        ethernet::packet_type_of(&self.body)
    }

    /// Dialect the sender used for this frame.
    pub fn dialect(&self) -> LinkDialect {
        if self.length_field == 0 {
            LinkDialect::ZERO_LENGTH
        } else {
            LinkDialect::LENGTH_AS_PROTOCOL
        }
    }
}

/// State shared with the capture thread.
struct Shared {
    local_mac: MacAddr,
    capacity: usize,
    cache: Mutex<VecDeque<CapturedFrame>>,
    arrived: Condvar,
    peer: Mutex<Option<MacAddr>>,
    upgrading: AtomicBool,
    running: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    fn accept(&self, raw: &[u8]) {
        let Some(link) = parse_link_frame(raw) else {
            return;
        };
        if link.src == self.local_mac {
            return;
        }
        let peer = *self.peer.lock();
        let wanted = link.dst == self.local_mac
            || link.src == MacAddr::FALLBACK_PEER
            || peer == Some(link.src);
        if !wanted {
            return;
        }
        let Some(packet_type) = link.packet_type() else {
            return;
        };
        if self.upgrading.load(Ordering::Acquire) && !UPGRADE_PACKETS.contains(&packet_type) {
            return;
        }
        if packet_type == IDENTIFY && peer != Some(link.src) {
            debug!("Peer address is now {}", link.src);
            *self.peer.lock() = Some(link.src);
        }
        if log_enabled!(Level::Trace) {
            trace!("RX {packet_type} from {}: {}", link.src, hex(link.body));
        }

        let frame = CapturedFrame {
            src: link.src,
            length_field: link.length_field,
            body: link.body.to_vec(),
        };
        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            cache.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 1000 == 0 {
                warn!("Receive cache full, {dropped} frames dropped so far");
            }
        }
        cache.push_back(frame);
        drop(cache);
        self.arrived.notify_one();
    }

    fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Remove and return the first cached frame satisfying `pred`.
    fn take_first(&self, pred: impl Fn(&CapturedFrame) -> bool) -> Option<CapturedFrame> {
        let mut cache = self.cache.lock();
        let index = cache.iter().position(pred)?;
        cache.remove(index)
    }

    fn wait(&self, timeout: Duration) {
        let mut cache = self.cache.lock();
        self.arrived.wait_for(&mut cache, timeout);
    }
}

fn capture_loop(mut rx: Box<dyn FrameReceiver>, shared: Arc<Shared>) {
    while shared.running.load(Ordering::Acquire) {
        match rx.recv_frame() {
            Ok(Some(raw)) => shared.accept(&raw),
            Ok(None) => {},
            Err(e) => {
                error!("Capture stopped: {e}");
                shared.running.store(false, Ordering::Release);
                break;
            },
        }
    }
    debug!("Capture thread exiting");
}

/// Raw Ethernet link to one unit.
pub struct EthernetCommunicator {
    name: String,
    local_mac: MacAddr,
    tx: Box<dyn FrameSender>,
    shared: Arc<Shared>,
    capture: Option<JoinHandle<()>>,
    dialect: Option<LinkDialect>,
    config: EthernetConfig,
}

impl EthernetCommunicator {
    /// Start capturing on an already opened link.
    pub fn new(
        name: impl Into<String>,
        local_mac: MacAddr,
        tx: Box<dyn FrameSender>,
        rx: Box<dyn FrameReceiver>,
        config: EthernetConfig,
    ) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            local_mac,
            capacity: config.cache_capacity.max(1),
            cache: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            peer: Mutex::new(None),
            upgrading: AtomicBool::new(false),
            running: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });
        let capture = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("capture-{name}"))
                .spawn(move || capture_loop(rx, shared))?
        };
        debug!("Capturing on {name} as {local_mac}");

        Ok(Self {
            name,
            local_mac,
            tx,
            shared,
            capture: Some(capture),
            dialect: None,
            config,
        })
    }

    /// Open a host interface by name.
    #[cfg(feature = "ethernet")]
    pub fn open(interface: &str, config: EthernetConfig) -> Result<Self> {
        let link = crate::transport::datalink::open(interface, config.capture_timeout)?;
        Self::new(interface, link.mac, link.tx, link.rx, config)
    }

    /// Our own address.
    pub fn local_mac(&self) -> MacAddr {
        self.local_mac
    }

    /// Address of the unit, once learned.
    pub fn peer(&self) -> Option<MacAddr> {
        *self.shared.peer.lock()
    }

    /// Frames dropped because the cache was full.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Send one identification probe in `dialect` and wait for the reply.
    fn probe(&mut self, dialect: LinkDialect) -> Result<CapturedFrame> {
        let (dst, expected_src) = if dialect.use_length_as_protocol {
            (MacAddr::BROADCAST, None)
        } else {
            (MacAddr::FALLBACK_PEER, Some(MacAddr::FALLBACK_PEER))
        };

        self.shared.clear();
        thread::sleep(self.config.probe_settle);
        let frame = ethernet::encode(dst, self.local_mac, IDENTIFY, &[], dialect);
        self.send(&frame)?;

        let deadline = Instant::now() + self.config.probe_window;
        loop {
            let reply = self.shared.take_first(|f| {
                f.packet_type() == Some(IDENTIFY) && expected_src.is_none_or(|mac| f.src == mac)
            });
            if let Some(reply) = reply {
                return Ok(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::DialectMismatch {
                    use_length_as_protocol: dialect.use_length_as_protocol,
                });
            }
            self.shared.wait(deadline - now);
        }
    }
}

impl Communicator for EthernetCommunicator {
    fn kind(&self) -> TransportKind {
        TransportKind::Ethernet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if log_enabled!(Level::Trace) {
            trace!("{} TX {}", self.name, hex(bytes));
        }
        self.tx.send_frame(bytes)
    }

    fn read(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>> {
        let mut cache = self.shared.cache.lock();
        if cache.is_empty() && !max_wait.is_zero() {
            self.shared.arrived.wait_for(&mut cache, max_wait);
        }
        Ok(cache.pop_front().map(|frame| frame.body))
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.shared.clear();
        Ok(())
    }

    fn can_write(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        if command.payload.len() > Framing::Ethernet.max_payload() {
            return Err(Error::Protocol(format!(
                "{} payload of {} bytes does not fit one frame",
                command.packet_type,
                command.payload.len()
            )));
        }
        let dst = if command.broadcast {
            MacAddr::BROADCAST
        } else {
            self.peer().unwrap_or(MacAddr::BROADCAST)
        };
        let dialect = command.dialect.or(self.dialect).unwrap_or_default();
        Ok(ethernet::encode(
            dst,
            self.local_mac,
            command.packet_type,
            &command.payload,
            dialect,
        ))
    }

    /// Probe the previously learned dialect first, then the other one.
    fn handshake(&mut self) -> Result<()> {
        let first = self.dialect.unwrap_or_default();
        for dialect in [first, first.other()] {
            match self.probe(dialect) {
                Ok(reply) => {
                    let learned = reply.dialect();
                    if self.dialect != Some(learned) {
                        info!(
                            "{}: peer {} (length as protocol: {})",
                            self.name, reply.src, learned.use_length_as_protocol
                        );
                    }
                    self.dialect = Some(learned);
                    *self.shared.peer.lock() = Some(reply.src);
                    return Ok(());
                },
                Err(Error::DialectMismatch {
                    use_length_as_protocol,
                }) => debug!(
                    "{}: no probe reply (length as protocol: {use_length_as_protocol})",
                    self.name
                ),
                Err(e) => return Err(e),
            }
        }
        Err(Error::DeviceNotFound)
    }

    fn dialect(&self) -> Option<LinkDialect> {
        self.dialect
    }

    fn set_upgrading(&mut self, upgrading: bool) {
        self.shared.upgrading.store(upgrading, Ordering::Release);
    }
}

impl Drop for EthernetCommunicator {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.capture.take() {
            if handle.join().is_err() {
                warn!("Capture thread for {} panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request::{ReadPolicy, request};
    use crate::testing::{SimulatedUnit, simulated_link};

    const LOCAL: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const UNIT: MacAddr = MacAddr([0x02, 0xAC, 0xE1, 0, 0, 0x07]);

    fn config() -> EthernetConfig {
        EthernetConfig {
            cache_capacity: 16,
            probe_settle: Duration::ZERO,
            probe_window: Duration::from_millis(200),
            capture_timeout: Duration::from_millis(5),
        }
    }

    fn link(unit: SimulatedUnit) -> EthernetCommunicator {
        let (tx, rx) = simulated_link(LOCAL, unit);
        EthernetCommunicator::new("sim0", LOCAL, tx, rx, config()).unwrap()
    }

    #[test]
    fn test_handshake_learns_peer_with_length_dialect() {
        let mut comm = link(SimulatedUnit::new(UNIT, LinkDialect::LENGTH_AS_PROTOCOL));
        comm.handshake().unwrap();
        assert_eq!(comm.dialect(), Some(LinkDialect::LENGTH_AS_PROTOCOL));
        assert_eq!(comm.peer(), Some(UNIT));
    }

    #[test]
    fn test_handshake_falls_back_to_zero_length() {
        let mut comm = link(SimulatedUnit::new(
            MacAddr::FALLBACK_PEER,
            LinkDialect::ZERO_LENGTH,
        ));
        comm.handshake().unwrap();
        assert_eq!(comm.dialect(), Some(LinkDialect::ZERO_LENGTH));
        assert_eq!(comm.peer(), Some(MacAddr::FALLBACK_PEER));
    }

    #[test]
    fn test_handshake_is_idempotent() {
        for dialect in [LinkDialect::LENGTH_AS_PROTOCOL, LinkDialect::ZERO_LENGTH] {
            let mac = if dialect.use_length_as_protocol {
                UNIT
            } else {
                MacAddr::FALLBACK_PEER
            };
            let mut comm = link(SimulatedUnit::new(mac, dialect));
            comm.handshake().unwrap();
            let learned = comm.dialect();
            comm.handshake().unwrap();
            assert_eq!(comm.dialect(), learned);
            assert_eq!(learned, Some(dialect));
        }
    }

    #[test]
    fn test_handshake_without_unit_is_not_found() {
        let mut comm = link(SimulatedUnit::silent(UNIT));
        assert!(matches!(comm.handshake(), Err(Error::DeviceNotFound)));
        assert_eq!(comm.dialect(), None);
    }

    #[test]
    fn test_request_through_capture_thread() {
        let mut comm = link(SimulatedUnit::new(UNIT, LinkDialect::LENGTH_AS_PROTOCOL));
        comm.handshake().unwrap();
        let policy = ReadPolicy {
            attempts: 200,
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
        };
        let reply = request(&mut comm, &Command::new(IDENTIFY), &policy).unwrap();
        assert!(String::from_utf8_lossy(&reply).contains("INS401"));
    }

    #[test]
    fn test_commands_go_to_learned_peer() {
        let mut comm = link(SimulatedUnit::new(UNIT, LinkDialect::LENGTH_AS_PROTOCOL));
        comm.handshake().unwrap();
        let frame = comm.encode(&Command::new(PacketType::new(0x03, 0xAA))).unwrap();
        assert_eq!(&frame[..6], &UNIT.octets());
        let frame = comm.encode(&Command::new(IDENTIFY).broadcast()).unwrap();
        assert_eq!(&frame[..6], &[0xFF; 6]);
        let frame = comm
            .encode(&Command::new(IDENTIFY).with_dialect(LinkDialect::ZERO_LENGTH))
            .unwrap();
        assert_eq!(&frame[12..14], &[0, 0]);
    }

    #[test]
    fn test_cache_drops_oldest_on_overflow() {
        let comm = link(SimulatedUnit::silent(UNIT));
        for i in 0..20u8 {
            let raw = ethernet::encode(
                LOCAL,
                UNIT,
                PacketType::new(0x03, 0xAA),
                &[i],
                LinkDialect::LENGTH_AS_PROTOCOL,
            );
            comm.shared.accept(&raw);
        }
        assert_eq!(comm.dropped_frames(), 4);
        let first = comm.shared.cache.lock().front().cloned().unwrap();
        assert_eq!(first.body[8], 4);
    }

    #[test]
    fn test_upgrading_filters_telemetry() {
        let mut comm = link(SimulatedUnit::silent(UNIT));
        comm.set_upgrading(true);
        for packet_type in [PacketType::ascii(b"s1"), PacketType::new(0x03, 0xAA)] {
            let raw = ethernet::encode(
                LOCAL,
                UNIT,
                packet_type,
                b"x",
                LinkDialect::LENGTH_AS_PROTOCOL,
            );
            comm.shared.accept(&raw);
        }
        let cached: Vec<_> = comm
            .shared
            .cache
            .lock()
            .iter()
            .filter_map(CapturedFrame::packet_type)
            .collect();
        assert_eq!(cached, vec![PacketType::new(0x03, 0xAA)]);
    }

    #[test]
    fn test_frames_for_other_hosts_ignored() {
        let comm = link(SimulatedUnit::silent(UNIT));
        let other = MacAddr([0x02, 9, 9, 9, 9, 9]);
        let raw = ethernet::encode(
            other,
            UNIT,
            PacketType::ascii(b"s1"),
            b"x",
            LinkDialect::LENGTH_AS_PROTOCOL,
        );
        comm.shared.accept(&raw);
        let own = ethernet::encode(
            LOCAL,
            LOCAL,
            PacketType::ascii(b"s1"),
            b"x",
            LinkDialect::LENGTH_AS_PROTOCOL,
        );
        comm.shared.accept(&own);
        assert!(comm.shared.cache.lock().is_empty());
    }
}
