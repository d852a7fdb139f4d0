//! Frame body shared by the UART and Ethernet formats.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+------+--------+-----------+--------+
//! |  Sync  | Type | Length |  Payload  | CRC16  |
//! +--------+------+--------+-----------+--------+
//! |   2    |  2   | 1 or 4 |  length   |   2    |
//! +--------+------+--------+-----------+--------+
//! | 0x5555 | tag  | len    |  data     | BE     |
//! +--------+------+--------+-----------+--------+
//! ```
//!
//! UART frames carry a one byte length. Ethernet frames carry a little-endian
//! u32 length and sit behind a 14-byte link header. The CRC covers the type,
//! length and payload fields.

use std::fmt;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::crc::{crc16, crc16_bytes};
use crate::transport::LinkDialect;

/// Sync marker at the start of every frame.
pub const SYNC: [u8; 2] = [0x55, 0x55];

/// Size of the trailing CRC.
pub const CRC_LEN: usize = 2;

/// Two-byte packet type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketType(pub [u8; 2]);

impl PacketType {
    /// Build a tag from its two raw bytes.
    pub const fn new(first: u8, second: u8) -> Self {
        Self([first, second])
    }

    /// Build a tag from a two character ASCII mnemonic such as `b"JI"`.
    pub const fn ascii(tag: &[u8; 2]) -> Self {
        Self(*tag)
    }

    /// Raw tag bytes in wire order.
    pub const fn bytes(self) -> [u8; 2] {
        self.0
    }

    /// Parse `"01cc"` style hex or a two character mnemonic.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let hex = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if hex.len() == 4 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let value = u16::from_str_radix(hex, 16).ok()?;
            let [first, second] = value.to_be_bytes();
            return Some(Self::new(first, second));
        }
        match text.as_bytes() {
            [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Some(Self::new(*a, *b)),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b] = self.0;
        if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() {
            write!(f, "{}{}", a as char, b as char)
        } else {
            write!(f, "{a:02x}{b:02x}")
        }
    }
}

impl fmt::Debug for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketType({self})")
    }
}

/// Which of the two wire formats a link speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Serial framing with a one byte length.
    Uart,
    /// Raw Ethernet framing with a four byte little-endian length.
    Ethernet,
}

impl Framing {
    /// Width of the length field.
    pub const fn length_width(self) -> usize {
        match self {
            Self::Uart => 1,
            Self::Ethernet => 4,
        }
    }

    /// Bytes from sync up to and including the length field.
    pub const fn header_len(self) -> usize {
        SYNC.len() + 2 + self.length_width()
    }

    /// Largest payload a well-formed frame can carry.
    pub const fn max_payload(self) -> usize {
        match self {
            Self::Uart => u8::MAX as usize,
            Self::Ethernet => 1500,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Type tag.
    pub packet_type: PacketType,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Outcome of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame with a valid CRC.
    Packet {
        /// The frame.
        packet: Packet,
        /// Bytes to drop from the front of the buffer, including leading noise.
        consumed: usize,
    },
    /// A complete frame whose CRC did not match.
    CrcFailure {
        /// Type tag of the corrupt frame.
        packet_type: PacketType,
        /// Bytes to drop to resume scanning after the frame.
        consumed: usize,
    },
    /// A sync marker whose length field cannot belong to a real frame.
    Noise {
        /// Bytes to drop to resume scanning after the false sync.
        consumed: usize,
    },
}

impl Decoded {
    /// Bytes this step consumed from the buffer.
    pub fn consumed(&self) -> usize {
        match self {
            Self::Packet { consumed, .. }
            | Self::CrcFailure { consumed, .. }
            | Self::Noise { consumed } => *consumed,
        }
    }
}

/// Position of the first sync marker in `buf`.
pub fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(SYNC.len()).position(|w| w == SYNC)
}

/// Encode the sync-to-CRC part of a frame.
pub fn encode_body(framing: Framing, packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(framing.header_len() + payload.len() + CRC_LEN);
    body.extend_from_slice(&SYNC);
    body.extend_from_slice(&packet_type.bytes());
    match framing {
        Framing::Uart => body.push(payload.len() as u8),
        Framing::Ethernet => {
            let mut len = [0u8; 4];
            LittleEndian::write_u32(&mut len, payload.len() as u32);
            body.extend_from_slice(&len);
        },
    }
    body.extend_from_slice(payload);
    let crc = crc16_bytes(&body[SYNC.len()..]);
    body.extend_from_slice(&crc);
    body
}

/// Decode the first frame in `buf`.
///
/// Returns `None` when the buffer holds no sync marker or the frame after it
/// is still incomplete; the caller should accumulate more input and retry.
pub fn decode(framing: Framing, buf: &[u8]) -> Option<Decoded> {
    let start = find_sync(buf)?;
    let frame = &buf[start..];
    if frame.len() < framing.header_len() {
        return None;
    }

    let packet_type = PacketType::new(frame[2], frame[3]);
    let payload_len = match framing {
        Framing::Uart => usize::from(frame[4]),
        Framing::Ethernet => LittleEndian::read_u32(&frame[4..8]) as usize,
    };
    if payload_len > framing.max_payload() {
        return Some(Decoded::Noise {
            consumed: start + 1,
        });
    }

    let total = framing.header_len() + payload_len + CRC_LEN;
    if frame.len() < total {
        return None;
    }

    let crc_at = total - CRC_LEN;
    let expected = crc16(&frame[SYNC.len()..crc_at]);
    let actual = u16::from_be_bytes([frame[crc_at], frame[crc_at + 1]]);
    let consumed = start + total;
    if expected != actual {
        return Some(Decoded::CrcFailure {
            packet_type,
            consumed,
        });
    }

    Some(Decoded::Packet {
        packet: Packet {
            packet_type,
            payload: frame[framing.header_len()..crc_at].to_vec(),
        },
        consumed,
    })
}

/// A command to send, described independently of link addressing.
///
/// The communicator encodes it at send time so that commands built before a
/// mode jump pick up the peer address and dialect learned after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Type tag sent.
    pub packet_type: PacketType,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Type tag of the expected reply.
    pub reply: PacketType,
    /// Send to the broadcast address instead of the learned peer.
    pub broadcast: bool,
    /// Force a dialect regardless of what the link negotiated.
    pub dialect: Option<LinkDialect>,
}

impl Command {
    /// A command with no payload whose reply carries the same tag.
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            payload: Vec::new(),
            reply: packet_type,
            broadcast: false,
            dialect: None,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Set the expected reply tag.
    #[must_use]
    pub fn with_reply(mut self, reply: PacketType) -> Self {
        self.reply = reply;
        self
    }

    /// Address the command to the broadcast MAC.
    #[must_use]
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Pin the dialect used to frame this command.
    #[must_use]
    pub fn with_dialect(mut self, dialect: LinkDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

/// An outstanding request waiting for its reply.
#[derive(Debug, Clone, Copy)]
pub struct PendingCommand {
    /// Tag of the reply that resolves this request.
    pub type_tag: PacketType,
    /// When the command was sent.
    pub issued_at: Instant,
    /// Wall-clock budget for the reply.
    pub timeout: Duration,
}

impl PendingCommand {
    /// Start tracking a command sent now.
    pub fn issue(type_tag: PacketType, timeout: Duration) -> Self {
        Self {
            type_tag,
            issued_at: Instant::now(),
            timeout,
        }
    }

    /// Whether `packet` resolves this request.
    pub fn matches(&self, packet: &Packet) -> bool {
        packet.packet_type == self.type_tag
    }

    /// Whether the wall-clock budget is spent.
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: PacketType = PacketType::ascii(b"pG");

    #[test]
    fn test_uart_body_layout() {
        let body = encode_body(Framing::Uart, PING, &[0xAA, 0xBB]);
        assert_eq!(&body[..5], &[0x55, 0x55, b'p', b'G', 2]);
        assert_eq!(&body[5..7], &[0xAA, 0xBB]);
        assert_eq!(&body[7..], &crc16_bytes(&[b'p', b'G', 2, 0xAA, 0xBB]));
    }

    #[test]
    fn test_ethernet_body_length_is_le_u32() {
        let body = encode_body(Framing::Ethernet, PacketType::new(0x03, 0xAA), &[0; 300]);
        assert_eq!(&body[4..8], &[0x2C, 0x01, 0x00, 0x00]);
        assert_eq!(body.len(), 8 + 300 + 2);
    }

    #[test]
    fn test_decode_roundtrip_both_framings() {
        let payload: Vec<u8> = (0..200).collect();
        for framing in [Framing::Uart, Framing::Ethernet] {
            let body = encode_body(framing, PING, &payload);
            match decode(framing, &body) {
                Some(Decoded::Packet { packet, consumed }) => {
                    assert_eq!(packet.packet_type, PING);
                    assert_eq!(packet.payload, payload);
                    assert_eq!(consumed, body.len());
                },
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_skips_leading_noise() {
        let mut buf = vec![0x00, 0x13, 0x55, 0x42];
        let body = encode_body(Framing::Uart, PING, b"hi");
        buf.extend_from_slice(&body);
        let decoded = decode(Framing::Uart, &buf).unwrap();
        assert!(matches!(decoded, Decoded::Packet { .. }));
        assert_eq!(decoded.consumed(), 4 + body.len());
    }

    #[test]
    fn test_decode_frame_followed_by_noise() {
        let body = encode_body(Framing::Ethernet, PING, b"payload");
        let mut buf = body.clone();
        buf.extend_from_slice(&[0x12, 0x55, 0x00, 0xFF, 0x55]);
        let decoded = decode(Framing::Ethernet, &buf).unwrap();
        assert_eq!(decoded.consumed(), body.len());
        assert!(matches!(decoded, Decoded::Packet { packet, .. } if packet.payload == b"payload"));
    }

    #[test]
    fn test_decode_incomplete_is_none() {
        let body = encode_body(Framing::Uart, PING, b"abcdef");
        for cut in 0..body.len() {
            assert_eq!(decode(Framing::Uart, &body[..cut]), None, "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_without_sync_is_none() {
        assert_eq!(decode(Framing::Uart, &[0x01, 0x02, 0x03, 0x55]), None);
    }

    #[test]
    fn test_corrupt_crc_reports_failure() {
        let body = encode_body(Framing::Uart, PING, b"abc");
        for index in [body.len() - 2, body.len() - 1] {
            let mut corrupt = body.clone();
            corrupt[index] ^= 0x01;
            assert_eq!(
                decode(Framing::Uart, &corrupt),
                Some(Decoded::CrcFailure {
                    packet_type: PING,
                    consumed: body.len()
                })
            );
        }
    }

    #[test]
    fn test_scan_resumes_after_crc_failure() {
        let mut corrupt = encode_body(Framing::Uart, PING, b"bad");
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = encode_body(Framing::Uart, PacketType::ascii(b"WA"), b"ok");
        let mut buf = corrupt.clone();
        buf.extend_from_slice(&good);

        let first = decode(Framing::Uart, &buf).unwrap();
        assert!(matches!(first, Decoded::CrcFailure { .. }));
        let rest = &buf[first.consumed()..];
        assert!(matches!(
            decode(Framing::Uart, rest),
            Some(Decoded::Packet { packet, .. }) if packet.payload == b"ok"
        ));
    }

    #[test]
    fn test_oversized_ethernet_length_is_noise() {
        let mut buf = vec![0x55, 0x55, 0x01, 0xCC];
        buf.extend_from_slice(&0x0010_0000u32.to_le_bytes());
        assert_eq!(
            decode(Framing::Ethernet, &buf),
            Some(Decoded::Noise { consumed: 1 })
        );
    }

    #[test]
    fn test_packet_type_parse_and_display() {
        assert_eq!(PacketType::parse("01cc"), Some(PacketType::new(0x01, 0xCC)));
        assert_eq!(PacketType::parse("0x4a49"), Some(PacketType::new(0x4A, 0x49)));
        assert_eq!(PacketType::parse("JI"), Some(PacketType::ascii(b"JI")));
        assert_eq!(PacketType::parse("xyz"), None);
        assert_eq!(PacketType::new(0x03, 0xAA).to_string(), "03aa");
        assert_eq!(PacketType::ascii(b"CS").to_string(), "CS");
    }

    #[test]
    fn test_pending_command_matching() {
        let pending = PendingCommand::issue(PING, Duration::from_secs(5));
        assert!(pending.matches(&Packet {
            packet_type: PING,
            payload: Vec::new()
        }));
        assert!(!pending.matches(&Packet {
            packet_type: PacketType::ascii(b"WA"),
            payload: Vec::new()
        }));
        assert!(!pending.is_expired());
        assert!(PendingCommand::issue(PING, Duration::ZERO).is_expired());
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new(PacketType::new(0x41, 0x57))
            .with_payload(vec![1, 2])
            .with_reply(PacketType::new(0x57, 0x41))
            .broadcast();
        assert_eq!(cmd.reply, PacketType::new(0x57, 0x41));
        assert!(cmd.broadcast);
        assert_eq!(cmd.dialect, None);
    }
}
