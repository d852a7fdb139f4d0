//! Accumulating decoder for byte streams and cached frame bodies.

use log::{trace, warn};

use crate::protocol::packet::{Decoded, Framing, Packet, SYNC, decode, find_sync};

/// Upper bound on buffered bytes before the oldest are discarded.
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Inbound bytes waiting to be decoded.
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer for the given framing.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            warn!("Receive buffer over {MAX_BUFFERED} bytes, dropping {excess} oldest");
            self.buf.drain(..excess);
        }
    }

    /// Decode the next event, dropping the bytes it consumed.
    ///
    /// Returns `None` once the buffer holds no complete frame. Bytes that can
    /// never begin a frame are discarded at that point.
    pub fn next_event(&mut self) -> Option<Decoded> {
        match decode(self.framing, &self.buf) {
            Some(event) => {
                self.buf.drain(..event.consumed());
                Some(event)
            },
            None => {
                self.discard_garbage();
                None
            },
        }
    }

    /// Decode the next CRC-valid frame, skipping corrupt ones.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.next_event()? {
                Decoded::Packet { packet, .. } => return Some(packet),
                Decoded::CrcFailure { packet_type, .. } => {
                    warn!("Dropped {packet_type} frame with bad CRC");
                },
                Decoded::Noise { consumed } => trace!("Skipped {consumed} bytes of noise"),
            }
        }
    }

    /// Forget everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn discard_garbage(&mut self) {
        match find_sync(&self.buf) {
            Some(0) => {},
            Some(start) => {
                self.buf.drain(..start);
            },
            None => {
                // A lone trailing sync byte may be the first half of a marker.
                let keep = usize::from(self.buf.last() == Some(&SYNC[0]));
                let drop = self.buf.len() - keep;
                self.buf.drain(..drop);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{PacketType, encode_body};

    const WA: PacketType = PacketType::ascii(b"WA");

    #[test]
    fn test_frame_split_across_reads() {
        let frame = encode_body(Framing::Uart, WA, b"0123456789");
        let mut buffer = FrameBuffer::new(Framing::Uart);
        buffer.extend(&frame[..3]);
        assert!(buffer.next_packet().is_none());
        buffer.extend(&frame[3..9]);
        assert!(buffer.next_packet().is_none());
        buffer.extend(&frame[9..]);
        let packet = buffer.next_packet().unwrap();
        assert_eq!(packet.payload, b"0123456789");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_corrupt_frame_skipped() {
        let mut bad = encode_body(Framing::Uart, WA, b"bad");
        bad[6] ^= 0x10;
        let good = encode_body(Framing::Uart, WA, b"good");
        let mut buffer = FrameBuffer::new(Framing::Uart);
        buffer.extend(&bad);
        buffer.extend(&good);
        assert_eq!(buffer.next_packet().unwrap().payload, b"good");
    }

    #[test]
    fn test_garbage_without_sync_is_dropped() {
        let mut buffer = FrameBuffer::new(Framing::Ethernet);
        buffer.extend(&[0x00; 40]);
        assert!(buffer.next_event().is_none());
        assert!(buffer.is_empty());

        buffer.extend(&[0x01, 0x02, 0x55]);
        assert!(buffer.next_event().is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_padding_between_cached_bodies() {
        let first = encode_body(Framing::Ethernet, PacketType::new(0x03, 0xAA), b"a");
        let second = encode_body(Framing::Ethernet, PacketType::new(0x01, 0xCC), b"b");
        let mut buffer = FrameBuffer::new(Framing::Ethernet);
        buffer.extend(&first);
        buffer.extend(&[0u8; 30]);
        buffer.extend(&second);
        assert_eq!(
            buffer.next_packet().unwrap().packet_type,
            PacketType::new(0x03, 0xAA)
        );
        assert_eq!(
            buffer.next_packet().unwrap().packet_type,
            PacketType::new(0x01, 0xCC)
        );
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buffer = FrameBuffer::new(Framing::Uart);
        buffer.extend(&vec![0x11; MAX_BUFFERED + 10]);
        assert_eq!(buffer.len(), MAX_BUFFERED);
    }
}
