//! Request/response correlation by packet type.
//!
//! A reply is matched on its type tag alone. Other frames seen while waiting
//! are discarded, as are frames with a bad CRC. Link errors during the wait
//! count as empty reads. A wait ends in a timeout, or in a CRC failure when
//! the only copies of the wanted reply were corrupt.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::frame_buffer::FrameBuffer;
use crate::protocol::packet::{Command, Decoded, PacketType, PendingCommand};
use crate::transport::Communicator;

/// Bounded wait for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReadPolicy {
    /// Number of reads before giving up.
    pub attempts: u32,
    /// Longest a single read may block.
    pub poll_interval: Duration,
    /// Wall-clock cap on the whole wait.
    pub timeout: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            attempts: 1000,
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ReadPolicy {
    /// Default policy with a different read budget.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }
}

/// Wait for a frame tagged `expected` and return its payload.
pub fn wait_for<C: Communicator + ?Sized>(
    link: &mut C,
    expected: PacketType,
    policy: &ReadPolicy,
) -> Result<Vec<u8>> {
    let pending = PendingCommand::issue(expected, policy.timeout);
    let mut buffer = FrameBuffer::new(link.framing());
    let mut corrupt = 0u32;

    for _ in 0..policy.attempts.max(1) {
        match link.read(policy.poll_interval) {
            Ok(Some(data)) => {
                buffer.extend(&data);
                while let Some(event) = buffer.next_event() {
                    match event {
                        Decoded::Packet { packet, .. } if pending.matches(&packet) => {
                            trace!("Matched {expected} reply ({} bytes)", packet.payload.len());
                            return Ok(packet.payload);
                        },
                        Decoded::Packet { packet, .. } => trace!(
                            "Ignoring {} frame while waiting for {expected}",
                            packet.packet_type
                        ),
                        Decoded::CrcFailure { packet_type, .. } => {
                            warn!("Dropped {packet_type} frame with bad CRC");
                            if packet_type == expected {
                                corrupt += 1;
                            }
                        },
                        Decoded::Noise { consumed } => {
                            trace!("Skipped {consumed} bytes of noise");
                        },
                    }
                }
            },
            Ok(None) => {},
            Err(e) => debug!("Read failed while waiting for {expected}: {e}"),
        }
        if pending.is_expired() {
            break;
        }
    }

    if corrupt > 0 {
        debug!("{corrupt} {expected} replies failed their CRC");
        return Err(Error::CrcFailure {
            packet_type: expected,
        });
    }
    Err(Error::Timeout(format!(
        "no {expected} reply after {} reads",
        policy.attempts
    )))
}

/// Send `command` and wait for its reply.
pub fn request<C: Communicator + ?Sized>(
    link: &mut C,
    command: &Command,
    policy: &ReadPolicy,
) -> Result<Vec<u8>> {
    let frame = link.encode(command)?;
    if let Err(e) = link.send(&frame) {
        warn!("Failed to send {}: {e}", command.packet_type);
        return Err(Error::Timeout(format!(
            "{} not sent: {e}",
            command.packet_type
        )));
    }
    wait_for(link, command.reply, policy)
}

/// Like [`request`], with only a wall-clock timeout.
pub fn request_with_timeout<C: Communicator + ?Sized>(
    link: &mut C,
    command: &Command,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let policy = ReadPolicy {
        attempts: u32::MAX,
        timeout,
        ..ReadPolicy::default()
    };
    request(link, command, &policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{Framing, encode_body};
    use crate::testing::MockLink;

    const GET: PacketType = PacketType::ascii(b"gA");
    const TELEMETRY: PacketType = PacketType::ascii(b"s1");

    fn quick(attempts: u32) -> ReadPolicy {
        ReadPolicy {
            attempts,
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_request_returns_matching_payload() {
        let mut link = MockLink::uart().respond_with(|cmd| {
            vec![
                encode_body(Framing::Uart, TELEMETRY, b"noise"),
                encode_body(Framing::Uart, cmd.packet_type, b"value"),
            ]
        });
        let payload = request(&mut link, &Command::new(GET), &quick(10)).unwrap();
        assert_eq!(payload, b"value");
        assert_eq!(link.sent().len(), 1);
    }

    #[test]
    fn test_request_skips_corrupt_reply() {
        let mut link = MockLink::uart().respond_with(|cmd| {
            let mut bad = encode_body(Framing::Uart, cmd.packet_type, b"bad");
            let last = bad.len() - 1;
            bad[last] ^= 0xFF;
            vec![bad, encode_body(Framing::Uart, cmd.packet_type, b"ok")]
        });
        let payload = request(&mut link, &Command::new(GET), &quick(10)).unwrap();
        assert_eq!(payload, b"ok");
    }

    #[test]
    fn test_only_corrupt_replies_report_crc_failure() {
        let mut link = MockLink::uart();
        let mut bad = encode_body(Framing::Uart, GET, b"bad");
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        link.push_read(bad);
        link.push_read(encode_body(Framing::Uart, TELEMETRY, b"noise"));
        let err = wait_for(&mut link, GET, &quick(5)).unwrap_err();
        assert!(matches!(err, Error::CrcFailure { packet_type } if packet_type == GET));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_corrupt_unrelated_frames_still_time_out() {
        let mut link = MockLink::uart();
        let mut bad = encode_body(Framing::Uart, TELEMETRY, b"bad");
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        link.push_read(bad);
        assert!(matches!(
            wait_for(&mut link, GET, &quick(5)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn test_wait_times_out_without_reply() {
        let mut link = MockLink::uart();
        let err = wait_for(&mut link, GET, &quick(25)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(link.reads(), 25);
    }

    #[test]
    fn test_wall_clock_cap() {
        let mut link = MockLink::uart();
        let policy = ReadPolicy {
            attempts: u32::MAX,
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };
        assert!(matches!(
            wait_for(&mut link, GET, &policy),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn test_reply_split_across_reads() {
        let mut link = MockLink::uart().respond_with(|cmd| {
            let frame = encode_body(Framing::Uart, cmd.packet_type, b"split");
            frame.chunks(3).map(<[u8]>::to_vec).collect()
        });
        let payload = request(&mut link, &Command::new(GET), &quick(20)).unwrap();
        assert_eq!(payload, b"split");
    }

    #[test]
    fn test_read_errors_become_timeout() {
        let mut link = MockLink::uart().fail_reads();
        assert!(matches!(
            wait_for(&mut link, GET, &quick(3)),
            Err(Error::Timeout(_))
        ));
    }
}
