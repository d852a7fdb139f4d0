//! Raw Ethernet (100BASE-T1) wire format.
//!
//! ```text
//! +---------+---------+-----------+---------------------------+---------+
//! | dst MAC | src MAC | frame len | sync .. crc (packet body) | padding |
//! +---------+---------+-----------+---------------------------+---------+
//! |    6    |    6    |  2 (LE)   |  8 + payload + 2          | to 46   |
//! +---------+---------+-----------+---------------------------+---------+
//! ```
//!
//! The frame length field holds the body size when the peer uses it as the
//! protocol marker, or zero when it does not.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;
use crate::protocol::packet::{Framing, PacketType, SYNC, encode_body};
use crate::transport::LinkDialect;

/// Bytes of destination plus source address.
pub const MAC_HEADER_LEN: usize = 12;

/// MAC header plus the two byte frame length field.
pub const LINK_HEADER_LEN: usize = MAC_HEADER_LEN + 2;

/// Minimum bytes after the link header; shorter bodies are zero padded.
pub const MIN_BODY_LEN: usize = 46;

/// A six byte hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// ff:ff:ff:ff:ff:ff
    pub const BROADCAST: Self = Self([0xFF; 6]);

    /// Address answered by units that do not use the length field, before
    /// their real address is known.
    pub const FALLBACK_PEER: Self = Self([0x04, 0x00, 0x00, 0x00, 0x00, 0x04]);

    /// Raw octets.
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    /// Whether this is the broadcast address.
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| Error::Config(format!("MAC address too short: {s}")))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Config(format!("Invalid MAC address: {s}")))?;
        }
        if parts.next().is_some() {
            return Err(Error::Config(format!("MAC address too long: {s}")));
        }
        Ok(Self(octets))
    }
}

/// Encode a complete link-layer frame.
pub fn encode(
    dst: MacAddr,
    src: MacAddr,
    packet_type: PacketType,
    payload: &[u8],
    dialect: LinkDialect,
) -> Vec<u8> {
    let body = encode_body(Framing::Ethernet, packet_type, payload);
    let padded = body.len().max(MIN_BODY_LEN);

    let mut frame = Vec::with_capacity(LINK_HEADER_LEN + padded);
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&src.octets());
    let length_field = if dialect.use_length_as_protocol {
        body.len() as u16
    } else {
        0
    };
    let mut len = [0u8; 2];
    LittleEndian::write_u16(&mut len, length_field);
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&body);
    frame.resize(LINK_HEADER_LEN + padded, 0);
    frame
}

/// A captured link-layer frame split into its header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame<'a> {
    /// Destination address.
    pub dst: MacAddr,
    /// Source address.
    pub src: MacAddr,
    /// Raw frame length field (zero in the length-less dialect).
    pub length_field: u16,
    /// Everything after the link header, padding included.
    pub body: &'a [u8],
}

impl LinkFrame<'_> {
    /// Type tag of the packet body, when the body starts with sync.
    pub fn packet_type(&self) -> Option<PacketType> {
        packet_type_of(self.body)
    }
}

/// Split a raw frame into header fields.
pub fn parse_link_frame(raw: &[u8]) -> Option<LinkFrame<'_>> {
    if raw.len() < LINK_HEADER_LEN {
        return None;
    }
    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&raw[..6]);
    src.copy_from_slice(&raw[6..MAC_HEADER_LEN]);
    Some(LinkFrame {
        dst: MacAddr(dst),
        src: MacAddr(src),
        length_field: LittleEndian::read_u16(&raw[MAC_HEADER_LEN..LINK_HEADER_LEN]),
        body: &raw[LINK_HEADER_LEN..],
    })
}

/// Type tag of a packet body beginning with the sync marker.
pub fn packet_type_of(body: &[u8]) -> Option<PacketType> {
    match body {
        [s0, s1, a, b, ..] if [*s0, *s1] == SYNC => Some(PacketType::new(*a, *b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{Decoded, decode};

    const LOCAL: MacAddr = MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const IDENTIFY: PacketType = PacketType::new(0x01, 0xCC);

    #[test]
    fn test_short_frame_is_padded() {
        let frame = encode(
            MacAddr::BROADCAST,
            LOCAL,
            IDENTIFY,
            &[],
            LinkDialect::LENGTH_AS_PROTOCOL,
        );
        assert_eq!(frame.len(), LINK_HEADER_LEN + MIN_BODY_LEN);
        assert_eq!(&frame[..6], &[0xFF; 6]);
        assert_eq!(&frame[6..12], &LOCAL.octets());
        // sync + type + len4 + crc
        assert_eq!(&frame[12..14], &10u16.to_le_bytes());
        assert!(frame[LINK_HEADER_LEN + 10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_length_dialect() {
        let frame = encode(
            MacAddr::FALLBACK_PEER,
            LOCAL,
            IDENTIFY,
            &[],
            LinkDialect::ZERO_LENGTH,
        );
        assert_eq!(&frame[12..14], &[0, 0]);
    }

    #[test]
    fn test_long_frame_not_padded() {
        let payload = vec![0x5A; 960];
        let frame = encode(
            LOCAL,
            LOCAL,
            PacketType::new(0x03, 0xAA),
            &payload,
            LinkDialect::LENGTH_AS_PROTOCOL,
        );
        assert_eq!(frame.len(), LINK_HEADER_LEN + 8 + 960 + 2);
    }

    #[test]
    fn test_encoded_body_decodes() {
        let frame = encode(
            MacAddr::BROADCAST,
            LOCAL,
            IDENTIFY,
            b"INS401",
            LinkDialect::LENGTH_AS_PROTOCOL,
        );
        let link = parse_link_frame(&frame).unwrap();
        assert_eq!(link.src, LOCAL);
        assert_eq!(link.packet_type(), Some(IDENTIFY));
        match decode(Framing::Ethernet, link.body) {
            Some(Decoded::Packet { packet, .. }) => assert_eq!(packet.payload, b"INS401"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_short_raw_frame() {
        assert!(parse_link_frame(&[0u8; 13]).is_none());
        assert!(packet_type_of(&[0x55, 0x55, 0x01]).is_none());
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "04:00:00:00:00:04".parse().unwrap();
        assert_eq!(mac, MacAddr::FALLBACK_PEER);
        assert_eq!(mac.to_string(), "04:00:00:00:00:04");
        let dashed: MacAddr = "FF-FF-FF-FF-FF-FF".parse().unwrap();
        assert!(dashed.is_broadcast());
        assert!("04:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("04:00:00:00:00:04:01".parse::<MacAddr>().is_err());
        assert!("zz:00:00:00:00:04".parse::<MacAddr>().is_err());
    }
}
